use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Instrument, Result, Tick};

/// Read-only view of the external tick store.
///
/// Ticks come back oldest first with non-decreasing timestamps.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn ticks_since(&self, instrument: &Instrument, since: DateTime<Utc>) -> Result<Vec<Tick>>;

    /// Most recent price recorded for the instrument, if any.
    async fn latest_price(&self, instrument: &Instrument) -> Result<Option<f64>>;
}

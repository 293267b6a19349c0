use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{FillOutcome, OpenOrder, OrderAck, OrderRequest, Result};

/// Abstraction over the execution venue.
///
/// `KiteClient` implements this for live trading.
/// `PaperGateway` implements this for simulation.
///
/// Only the controller in `crates/engine` holds a `dyn ExecutionGateway`;
/// it awaits every call before making the next decision.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Signed net quantity per venue symbol. Symbols with no position may be
    /// absent or reported as zero.
    async fn net_positions(&self) -> Result<HashMap<String, i64>>;

    /// Orders currently known to the venue for this session.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>>;

    /// Submit a market order and return the venue's order id.
    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Wait up to `timeout` for the order to reach a terminal state.
    /// Running out of time yields `FillOutcome::Pending`, not an error.
    async fn await_fill(&self, order_id: &str, timeout: Duration) -> Result<FillOutcome>;

    /// True if any order is still working or any net position is non-zero,
    /// across all instruments.
    ///
    /// Fail-safe: a failed query counts as pending activity, so a transport
    /// problem can block a new entry but never cause a duplicate one.
    async fn has_pending_activity(&self) -> bool {
        match self.net_positions().await {
            Ok(positions) if positions.values().any(|&qty| qty != 0) => return true,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Net position query failed, assuming pending activity");
                return true;
            }
        }

        match self.open_orders().await {
            Ok(orders) => orders.iter().any(|o| o.status.is_pending()),
            Err(e) => {
                warn!(error = %e, "Open order query failed, assuming pending activity");
                true
            }
        }
    }
}

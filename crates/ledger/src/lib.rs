pub mod sqlite;

pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use thiserror::Error;

use common::{Side, TradeRecord};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("a trade is already open")]
    AlreadyOpen,

    #[error("no trade is open")]
    NotOpen,

    #[error("ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("ledger migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("ledger row is corrupt: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// `AlreadyOpen` / `NotOpen`: the caller's view of the ledger was wrong.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::AlreadyOpen | LedgerError::NotOpen)
    }
}

impl From<LedgerError> for common::Error {
    fn from(e: LedgerError) -> Self {
        common::Error::Ledger(e.to_string())
    }
}

/// Durable single-slot record of the one open trade.
///
/// Every successful `open`/`close` is committed before it returns, and
/// `current` always reflects the last committed write. The control loop is
/// the only writer.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// The open trade, or `None` when flat.
    async fn current(&self) -> Result<Option<TradeRecord>, LedgerError>;

    /// Record a newly filled entry. Fails with `AlreadyOpen` if a trade exists.
    async fn open(&self, instrument: &str, side: Side) -> Result<TradeRecord, LedgerError>;

    /// Remove the open trade and return it. Fails with `NotOpen` when flat.
    async fn close(&self) -> Result<TradeRecord, LedgerError>;
}

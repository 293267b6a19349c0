use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use common::{Side, TradeRecord};

use crate::{LedgerError, TradeLedger};

/// `TradeLedger` backed by a single-row SQLite table (`live_trade`).
///
/// The pool holds one connection, so reads and writes are serialized and a
/// read always sees the previous write.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Connect using a `sqlite:` URL, creating the file if needed, and apply
    /// migrations.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::with_options(durable(options)).await
    }

    /// Open (or create) a ledger database file.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new().filename(path);
        Self::with_options(durable(options)).await
    }

    /// Private in-memory ledger, gone when dropped.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self, LedgerError> {
        // Never recycle the connection; an in-memory database lives only as
        // long as it does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        debug!("Trade ledger ready");
        Ok(Self { pool })
    }

    /// Close the underlying pool, waiting for connections to finish.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

/// Commit means on disk: WAL with a full fsync per transaction.
fn durable(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
}

fn decode(row: &SqliteRow) -> Result<TradeRecord, LedgerError> {
    let instrument: String = row.try_get("instrument")?;
    let side: String = row.try_get("side")?;
    let opened_at: String = row.try_get("opened_at")?;

    let side = Side::from_str(&side).map_err(LedgerError::Corrupt)?;
    let opened_at = DateTime::parse_from_rfc3339(&opened_at)
        .map_err(|e| LedgerError::Corrupt(format!("opened_at '{opened_at}': {e}")))?
        .with_timezone(&Utc);

    Ok(TradeRecord {
        opened_at,
        instrument,
        side,
    })
}

#[async_trait]
impl TradeLedger for SqliteLedger {
    async fn current(&self) -> Result<Option<TradeRecord>, LedgerError> {
        let row = sqlx::query("SELECT instrument, side, opened_at FROM live_trade WHERE slot = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn open(&self, instrument: &str, side: Side) -> Result<TradeRecord, LedgerError> {
        let record = TradeRecord {
            opened_at: Utc::now(),
            instrument: instrument.to_string(),
            side,
        };

        // Conditional insert: the existence check and the write are one statement.
        let result = sqlx::query(
            r#"
            INSERT INTO live_trade (slot, instrument, side, opened_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(slot) DO NOTHING
            "#,
        )
        .bind(&record.instrument)
        .bind(record.side.to_string())
        .bind(record.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyOpen);
        }

        info!(instrument = %record.instrument, side = %record.side, "Ledger: trade opened");
        Ok(record)
    }

    async fn close(&self) -> Result<TradeRecord, LedgerError> {
        let row = sqlx::query(
            "DELETE FROM live_trade WHERE slot = 1 RETURNING instrument, side, opened_at",
        )
        .fetch_optional(&self.pool)
        .await?;

        let record = match row {
            Some(row) => decode(&row)?,
            None => return Err(LedgerError::NotOpen),
        };

        info!(instrument = %record.instrument, side = %record.side, "Ledger: trade closed");
        Ok(record)
    }
}

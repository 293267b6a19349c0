use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use common::config::is_identifier;
use common::{Error, Instrument, MarketData, Result, Tick};

/// Timestamp layouts written by the tick recorder.
const DATESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Read-only access to the tick table filled by the external recorder.
///
/// The table has a `datestamp` column plus, per instrument code `XX`, a
/// price column `XX` and a cumulative volume column `XXV`.
pub struct SqliteTickStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteTickStore {
    /// Open the recorder's database read-only.
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, table)
    }

    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        if !is_identifier(table) {
            return Err(Error::Config(format!("invalid tick table name '{table}'")));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn column(&self, instrument: &Instrument) -> Result<String> {
        if is_identifier(&instrument.code) {
            Ok(instrument.code.clone())
        } else {
            Err(Error::MarketData(format!(
                "instrument code '{}' is not a valid column name",
                instrument.code
            )))
        }
    }
}

#[async_trait]
impl MarketData for SqliteTickStore {
    async fn ticks_since(&self, instrument: &Instrument, since: DateTime<Utc>) -> Result<Vec<Tick>> {
        let code = self.column(instrument)?;
        let sql = format!(
            r#"
            SELECT CAST(datestamp AS TEXT) AS datestamp,
                   CAST("{code}" AS REAL)  AS price,
                   CAST("{code}V" AS REAL) AS volume
            FROM "{table}"
            WHERE datestamp >= ?1 AND "{code}" IS NOT NULL
            ORDER BY datestamp
            "#,
            table = self.table
        );

        let rows = sqlx::query(&sql)
            .bind(since.format("%Y-%m-%d %H:%M:%S").to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut ticks = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        let mut last_volume = 0.0;
        for row in rows {
            let raw: String = row.try_get("datestamp")?;
            let Some(timestamp) = parse_datestamp(&raw) else {
                skipped += 1;
                continue;
            };
            let price: f64 = row.try_get("price")?;
            // A missing volume sample reads as "unchanged".
            let volume = row.try_get::<Option<f64>, _>("volume")?.unwrap_or(last_volume);
            last_volume = volume;
            ticks.push(Tick {
                timestamp,
                price,
                volume,
            });
        }

        if skipped > 0 {
            warn!(instrument = %instrument.code, skipped, "Skipped ticks with unparseable datestamps");
        }
        debug!(instrument = %instrument.code, ticks = ticks.len(), "Loaded ticks");
        Ok(ticks)
    }

    async fn latest_price(&self, instrument: &Instrument) -> Result<Option<f64>> {
        let code = self.column(instrument)?;
        let sql = format!(
            r#"SELECT CAST("{code}" AS REAL) AS price FROM "{table}"
               WHERE "{code}" IS NOT NULL ORDER BY datestamp DESC LIMIT 1"#,
            table = self.table
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        Ok(match row {
            Some(row) => Some(row.try_get("price")?),
            None => None,
        })
    }
}

fn parse_datestamp(raw: &str) -> Option<DateTime<Utc>> {
    DATESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

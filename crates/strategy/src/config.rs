use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::config::is_identifier;
use common::{Error, Instrument, Result};

/// Trader settings file (TOML).
///
/// Example `config/trader.toml`:
/// ```toml
/// poll_interval_secs = 5
/// quantity = 1
///
/// [ema]
/// fast = 5
/// slow = 15
///
/// [[instrument]]
/// code = "HB"
/// venue_symbol = "HDFCBANK"
/// ```
///
/// Instruments are scanned in file order; the first one to signal wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TraderConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Candle width in seconds.
    #[serde(default = "default_candle_interval_secs")]
    pub candle_interval_secs: u64,
    /// How far back to read ticks each poll. Must cover enough bars to warm the EMAs.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,
    /// Fixed order quantity for every entry and exit.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Upper bound on a single fill wait.
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,
    #[serde(default)]
    pub ema: EmaSpans,
    #[serde(rename = "instrument")]
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmaSpans {
    pub fast: usize,
    pub slow: usize,
}

impl Default for EmaSpans {
    fn default() -> Self {
        Self { fast: 5, slow: 15 }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_candle_interval_secs() -> u64 {
    60
}

fn default_lookback_minutes() -> u64 {
    24 * 60
}

fn default_quantity() -> u32 {
    1
}

fn default_fill_timeout_ms() -> u64 {
    3_000
}

impl TraderConfig {
    /// Load and validate from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read trader config at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Invalid trader config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: TraderConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::Config("at least one [[instrument]] is required".into()));
        }

        let mut seen = HashSet::new();
        for inst in &self.instruments {
            if !is_identifier(&inst.code) {
                return Err(Error::Config(format!(
                    "instrument code must be alphanumeric, got '{}'",
                    inst.code
                )));
            }
            if inst.venue_symbol.trim().is_empty() {
                return Err(Error::Config(format!(
                    "instrument '{}' has an empty venue_symbol",
                    inst.code
                )));
            }
            if !seen.insert(inst.code.as_str()) {
                return Err(Error::Config(format!("duplicate instrument code '{}'", inst.code)));
            }
        }

        if self.ema.fast == 0 || self.ema.fast >= self.ema.slow {
            return Err(Error::Config(format!(
                "ema spans must satisfy 0 < fast < slow, got fast={} slow={}",
                self.ema.fast, self.ema.slow
            )));
        }
        if self.quantity == 0 {
            return Err(Error::Config("quantity must be positive".into()));
        }
        if self.poll_interval_secs == 0 || self.candle_interval_secs == 0 {
            return Err(Error::Config("poll and candle intervals must be positive".into()));
        }
        if self.lookback_minutes == 0 {
            return Err(Error::Config("lookback_minutes must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn candle_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.candle_interval_secs as i64)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookback_minutes as i64)
    }

    /// Look up a configured instrument by its short code.
    pub fn instrument(&self, code: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        poll_interval_secs = 2
        quantity = 3

        [[instrument]]
        code = "HB"
        venue_symbol = "HDFCBANK"

        [[instrument]]
        code = "RS"
        venue_symbol = "RELIANCE"
    "#;

    #[test]
    fn parses_with_defaults() {
        let cfg = TraderConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.quantity, 3);
        assert_eq!(cfg.candle_interval_secs, 60);
        assert_eq!(cfg.ema, EmaSpans { fast: 5, slow: 15 });
        assert_eq!(cfg.fill_timeout(), Duration::from_millis(3_000));
        let codes: Vec<&str> = cfg.instruments.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, ["HB", "RS"]);
        assert_eq!(cfg.instrument("RS").unwrap().venue_symbol, "RELIANCE");
        assert!(cfg.instrument("XX").is_none());
    }

    #[test]
    fn rejects_missing_instruments() {
        let err = TraderConfig::from_toml_str("instrument = []").unwrap_err();
        assert!(err.to_string().contains("instrument"), "{err}");
    }

    #[test]
    fn rejects_duplicate_codes() {
        let toml = r#"
            [[instrument]]
            code = "HB"
            venue_symbol = "HDFCBANK"
            [[instrument]]
            code = "HB"
            venue_symbol = "OTHER"
        "#;
        assert!(TraderConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_non_identifier_codes() {
        let toml = r#"
            [[instrument]]
            code = "HB`; --"
            venue_symbol = "HDFCBANK"
        "#;
        assert!(TraderConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_inverted_ema_spans() {
        let toml = r#"
            [ema]
            fast = 15
            slow = 5
            [[instrument]]
            code = "HB"
            venue_symbol = "HDFCBANK"
        "#;
        assert!(TraderConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_zero_quantity() {
        let toml = r#"
            quantity = 0
            [[instrument]]
            code = "HB"
            venue_symbol = "HDFCBANK"
        "#;
        assert!(TraderConfig::from_toml_str(toml).is_err());
    }
}

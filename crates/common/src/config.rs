use crate::{Error, Result, TradingMode};

/// Runtime settings loaded from environment variables at startup.
/// Strategy and instrument settings live in the TOML file named by
/// `trader_config_path`.
#[derive(Debug, Clone)]
pub struct Config {
    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,

    // Databases
    pub database_url: String,
    pub market_database_url: String,
    pub tick_table: String,

    // Trader config file path
    pub trader_config_path: String,

    // Venue (live mode only)
    pub kite: Option<KiteCredentials>,
    pub kite_exchange: String,
    pub kite_product: String,
}

/// Session credentials for the Kite Connect API.
/// The session itself is created outside this program.
#[derive(Clone)]
pub struct KiteCredentials {
    pub api_key: String,
    pub access_token: String,
}

impl std::fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &self.api_key)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE")?.to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
                )))
            }
        };

        let kite = match trading_mode {
            TradingMode::Live => {
                let token_path = required_env("KITE_ACCESS_TOKEN_PATH")?;
                let access_token = std::fs::read_to_string(&token_path)
                    .map_err(|e| {
                        Error::Config(format!("cannot read access token at '{token_path}': {e}"))
                    })?
                    .trim()
                    .to_string();
                if access_token.is_empty() {
                    return Err(Error::Config(format!(
                        "access token file '{token_path}' is empty"
                    )));
                }
                Some(KiteCredentials {
                    api_key: required_env("KITE_API_KEY")?,
                    access_token,
                })
            }
            TradingMode::Paper => None,
        };

        let paper_slippage_bps = match optional_env("PAPER_SLIPPAGE_BPS") {
            Some(v) => v.parse().map_err(|_| {
                Error::Config(format!("PAPER_SLIPPAGE_BPS is not a number: '{v}'"))
            })?,
            None => 0.0,
        };

        let tick_table = optional_env("TICK_TABLE").unwrap_or_else(|| "testTable".to_string());
        if !is_identifier(&tick_table) {
            return Err(Error::Config(format!(
                "TICK_TABLE must be alphanumeric/underscore, got: '{tick_table}'"
            )));
        }

        Ok(Config {
            trading_mode,
            paper_slippage_bps,
            database_url: required_env("DATABASE_URL")?,
            market_database_url: required_env("MARKET_DATABASE_URL")?,
            tick_table,
            trader_config_path: optional_env("TRADER_CONFIG_PATH")
                .unwrap_or_else(|| "config/trader.toml".to_string()),
            kite,
            kite_exchange: optional_env("KITE_EXCHANGE").unwrap_or_else(|| "NSE".to_string()),
            kite_product: optional_env("KITE_PRODUCT").unwrap_or_else(|| "MIS".to_string()),
        })
    }
}

/// True for names safe to splice into SQL as table or column identifiers.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_sql_metacharacters() {
        assert!(is_identifier("testTable"));
        assert!(is_identifier("HB"));
        assert!(is_identifier("tick_2024"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("HB; DROP TABLE live_trade"));
        assert!(!is_identifier("a\"b"));
    }

    #[test]
    fn credentials_debug_hides_token() {
        let creds = KiteCredentials {
            api_key: "key".into(),
            access_token: "secret-token".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("key"));
        assert!(!shown.contains("secret-token"));
    }
}

pub mod config;
pub mod error;
pub mod gateway;
pub mod market_data;
pub mod types;

pub use config::{Config, KiteCredentials};
pub use error::{Error, Result};
pub use gateway::ExecutionGateway;
pub use market_data::MarketData;
pub use types::*;

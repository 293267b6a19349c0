pub mod controller;
pub mod executor;
pub mod journal;
pub mod kite;
pub mod lifecycle;
pub mod market;

pub use controller::Controller;
pub use executor::OrderExecutor;
pub use journal::{Journal, PnlTracker};
pub use kite::KiteClient;
pub use lifecycle::{Engine, EngineHandle};
pub use market::SqliteTickStore;

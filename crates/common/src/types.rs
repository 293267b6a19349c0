use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A watched instrument: the short code used by the tick store and the ledger,
/// and the symbol the venue trades it under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub venue_symbol: String,
}

impl Instrument {
    pub fn new(code: impl Into<String>, venue_symbol: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            venue_symbol: venue_symbol.into(),
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code, self.venue_symbol)
    }
}

/// One sample from the time-series store. `volume` is a cumulative counter
/// that may reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

/// Fixed-interval OHLCV bar. `bucket` is the interval start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub bucket: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of a position, and of the entry signal that opens one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction.
    pub fn entry_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that squares off a position in this direction.
    pub fn exit_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Side of an order sent to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Crossover detected on the most recent closed bar of an instrument.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    /// Bucket start of the closed bar the crossover completed on.
    pub bucket: DateTime<Utc>,
    pub direction: Side,
}

/// The one currently open trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub opened_at: DateTime<Utc>,
    /// Instrument code (not the venue symbol).
    pub instrument: String,
    pub side: Side,
}

/// An immediate-execution market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
}

impl OrderRequest {
    pub fn market(instrument: &Instrument, side: OrderSide, quantity: u32) -> Self {
        Self {
            instrument: instrument.clone(),
            side,
            quantity,
        }
    }
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

/// Venue order status, as far as the loop cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    TriggerPending,
    Complete,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "OPEN" => OrderStatus::Open,
            "TRIGGER PENDING" => OrderStatus::TriggerPending,
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    /// Whether the order still counts as pending activity at the venue.
    pub fn is_pending(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::TriggerPending)
    }
}

/// An order as listed by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub venue_symbol: String,
    pub status: OrderStatus,
}

/// Result of waiting on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FillOutcome {
    Filled { price: f64, time: DateTime<Utc> },
    /// Not yet terminal when the wait ran out.
    Pending,
    Rejected { reason: String },
}

/// Whether the bot trades against the real venue or simulates fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Run state of the polling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Pause,
    Resume,
    Stop,
}

/// Where the single position currently stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Entering {
        instrument: Instrument,
        side: Side,
        order_id: String,
    },
    Open(TradeRecord),
    Exiting {
        record: TradeRecord,
        order_id: String,
    },
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::Flat => write!(f, "flat"),
            PositionState::Entering { instrument, side, .. } => {
                write!(f, "entering {side} {}", instrument.code)
            }
            PositionState::Open(r) => write!(f, "open {} {}", r.side, r.instrument),
            PositionState::Exiting { record, .. } => {
                write!(f, "exiting {} {}", record.side, record.instrument)
            }
        }
    }
}

/// Why the open trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Our opposite-side order filled.
    SquaredOff,
    /// The venue showed the position flat without us trading.
    ExternallyFlattened,
}

/// Audit events emitted by the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    SignalDetected(Signal),
    OrderPlaced {
        instrument: String,
        side: OrderSide,
        quantity: u32,
        order_id: String,
    },
    OrderFilled {
        instrument: String,
        order_id: String,
        side: OrderSide,
        quantity: u32,
        price: f64,
        time: DateTime<Utc>,
    },
    OrderRejected {
        instrument: String,
        order_id: String,
        reason: String,
    },
    OrderFailed {
        instrument: String,
        side: OrderSide,
        error: String,
    },
    TradeOpened {
        instrument: String,
        side: Side,
    },
    TradeClosed {
        instrument: String,
        reason: CloseReason,
    },
    ReconciliationFault {
        detail: String,
    },
    LoopFault {
        error: String,
    },
}

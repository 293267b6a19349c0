#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use common::{
    Error, ExecutionGateway, FillOutcome, Instrument, MarketData, OpenOrder, OrderAck,
    OrderRequest, OrderSide, Result, Tick, TradeEvent,
};
use engine::Controller;
use ledger::SqliteLedger;
use strategy::TraderConfig;

// ─── Venue ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Venue {
    pub net: HashMap<String, i64>,
    pub orders: Vec<OpenOrder>,
    pub submitted: Vec<OrderRequest>,
    /// Outcome handed to the next submitted order. `None` fills at 100.
    pub next_outcome: Option<FillOutcome>,
    pub fail_queries: bool,
    pub fail_submit: bool,
    pub fail_fill_query: bool,
    outcomes: HashMap<String, (OrderRequest, FillOutcome)>,
}

impl Venue {
    fn apply_fill(&mut self, order: &OrderRequest) {
        let signed = match order.side {
            OrderSide::Buy => order.quantity as i64,
            OrderSide::Sell => -(order.quantity as i64),
        };
        let qty = self.net.entry(order.instrument.venue_symbol.clone()).or_insert(0);
        *qty += signed;
    }
}

/// Gateway whose behaviour each test scripts through `venue()`.
#[derive(Default)]
pub struct ScriptedGateway {
    venue: Mutex<Venue>,
}

impl ScriptedGateway {
    pub fn venue(&self) -> std::sync::MutexGuard<'_, Venue> {
        self.venue.lock().unwrap()
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.venue().submitted.clone()
    }

    /// Complete a previously pending order.
    pub fn fill(&self, order_id: &str, price: f64) {
        let mut venue = self.venue();
        let (order, _) = venue.outcomes.get(order_id).cloned().unwrap();
        venue.apply_fill(&order);
        venue.outcomes.insert(
            order_id.to_string(),
            (order, FillOutcome::Filled { price, time: Utc::now() }),
        );
    }
}

#[async_trait]
impl ExecutionGateway for ScriptedGateway {
    async fn net_positions(&self) -> Result<HashMap<String, i64>> {
        let venue = self.venue();
        if venue.fail_queries {
            return Err(Error::Http("connection reset".into()));
        }
        Ok(venue.net.clone())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        let venue = self.venue();
        if venue.fail_queries {
            return Err(Error::Http("connection reset".into()));
        }
        Ok(venue.orders.clone())
    }

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut venue = self.venue();
        if venue.fail_submit {
            return Err(Error::Gateway("order rejected by RMS".into()));
        }
        venue.submitted.push(order.clone());
        let order_id = format!("ord-{}", venue.submitted.len());

        let outcome = venue.next_outcome.clone().unwrap_or(FillOutcome::Filled {
            price: 100.0,
            time: Utc::now(),
        });
        if matches!(outcome, FillOutcome::Filled { .. }) {
            venue.apply_fill(order);
        }
        venue.outcomes.insert(order_id.clone(), (order.clone(), outcome));
        Ok(OrderAck { order_id })
    }

    async fn await_fill(&self, order_id: &str, _timeout: Duration) -> Result<FillOutcome> {
        let venue = self.venue();
        if venue.fail_fill_query {
            return Err(Error::Http("timed out".into()));
        }
        venue
            .outcomes
            .get(order_id)
            .map(|(_, outcome)| outcome.clone())
            .ok_or_else(|| Error::Gateway(format!("unknown order {order_id}")))
    }
}

// ─── Market data ──────────────────────────────────────────────────────────────

/// Serves a fixed tick series per instrument code, one tick per minute.
#[derive(Default)]
pub struct StubMarket {
    ticks: Mutex<HashMap<String, Vec<Tick>>>,
}

impl StubMarket {
    pub fn set_closes(&self, code: &str, closes: &[f64]) {
        let start = session_start();
        let ticks = closes
            .iter()
            .enumerate()
            .map(|(i, &price)| Tick {
                timestamp: start + chrono::Duration::minutes(i as i64),
                price,
                volume: (i as f64 + 1.0) * 10.0,
            })
            .collect();
        self.ticks.lock().unwrap().insert(code.to_string(), ticks);
    }
}

#[async_trait]
impl MarketData for StubMarket {
    async fn ticks_since(&self, instrument: &Instrument, _since: DateTime<Utc>) -> Result<Vec<Tick>> {
        Ok(self
            .ticks
            .lock()
            .unwrap()
            .get(&instrument.code)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_price(&self, instrument: &Instrument) -> Result<Option<f64>> {
        Ok(self
            .ticks
            .lock()
            .unwrap()
            .get(&instrument.code)
            .and_then(|t| t.last())
            .map(|t| t.price))
    }
}

pub fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap()
}

/// Falling closes, a jump on the last closed bar, then the forming bar.
pub fn cross_up() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..18).map(|i| 120.0 - i as f64).collect();
    closes.extend([140.0, 140.0]);
    closes
}

pub fn cross_down() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..18).map(|i| 100.0 + i as f64).collect();
    closes.extend([80.0, 80.0]);
    closes
}

pub fn quiet() -> Vec<f64> {
    vec![100.0; 30]
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub const INSTRUMENTS: &str = r#"
    quantity = 2

    [[instrument]]
    code = "HB"
    venue_symbol = "HDFCBANK"

    [[instrument]]
    code = "RS"
    venue_symbol = "RELIANCE"

    [[instrument]]
    code = "IB"
    venue_symbol = "ICICIBANK"
"#;

pub struct Harness {
    pub controller: Controller,
    pub gateway: Arc<ScriptedGateway>,
    pub market: Arc<StubMarket>,
    pub ledger: Arc<SqliteLedger>,
    pub events: mpsc::Receiver<TradeEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ledger(Arc::new(SqliteLedger::in_memory().await.unwrap())).await
    }

    pub async fn with_ledger(ledger: Arc<SqliteLedger>) -> Self {
        let cfg = TraderConfig::from_toml_str(INSTRUMENTS).unwrap();
        let gateway = Arc::new(ScriptedGateway::default());
        let market = Arc::new(StubMarket::default());
        for inst in &cfg.instruments {
            market.set_closes(&inst.code, &quiet());
        }
        let (tx, events) = mpsc::channel(256);
        let controller = Controller::new(
            cfg,
            market.clone(),
            gateway.clone(),
            ledger.clone(),
            tx,
        );
        Self {
            controller,
            gateway,
            market,
            ledger,
            events,
        }
    }

    /// Everything emitted since the last call.
    pub fn drain(&mut self) -> Vec<TradeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{CloseReason, OrderSide, TradeEvent};

/// Running P&L over completed round trips.
///
/// Fills are signed cash flows (buy pays, sell receives). A fill becomes the
/// entry leg only when `TradeOpened` follows it, and the round trip is
/// counted only when a square-off closes that leg. An exit whose entry was
/// never seen, such as one for a trade resumed after a restart, is not
/// counted.
#[derive(Debug, Default)]
pub struct PnlTracker {
    last_order: Option<String>,
    last_fill: Option<f64>,
    entry: Option<f64>,
    realized: f64,
    round_trips: u32,
}

impl PnlTracker {
    /// Note a fill. Returns `false` when the same order was already recorded.
    pub fn record_fill(&mut self, order_id: &str, side: OrderSide, price: f64, quantity: u32) -> bool {
        if self.last_order.as_deref() == Some(order_id) {
            return false;
        }
        let cash = match side {
            OrderSide::Buy => -price * quantity as f64,
            OrderSide::Sell => price * quantity as f64,
        };
        self.last_order = Some(order_id.to_string());
        self.last_fill = Some(cash);
        true
    }

    /// The trade was opened on the last recorded fill.
    pub fn open_leg(&mut self) {
        self.entry = self.last_fill.take();
    }

    /// The open trade was squared off on the last recorded fill. Returns the
    /// round-trip P&L when both legs were seen.
    pub fn close_leg(&mut self) -> Option<f64> {
        let exit = self.last_fill.take();
        let entry = self.entry.take();
        let trip = entry? + exit?;
        self.realized += trip;
        self.round_trips += 1;
        Some(trip)
    }

    /// Forget a half-recorded trip whose exit will never be seen.
    pub fn abandon_leg(&mut self) {
        self.entry = None;
        self.last_fill = None;
    }

    pub fn realized(&self) -> f64 {
        self.realized
    }

    pub fn round_trips(&self) -> u32 {
        self.round_trips
    }
}

/// Consumes `TradeEvent`s and writes the audit trail to the log.
pub struct Journal {
    event_rx: mpsc::Receiver<TradeEvent>,
    pnl: PnlTracker,
}

impl Journal {
    pub fn new(event_rx: mpsc::Receiver<TradeEvent>) -> Self {
        Self {
            event_rx,
            pnl: PnlTracker::default(),
        }
    }

    /// Call from `tokio::spawn`. Ends when every sender is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            self.record(&event);
        }
        info!(
            realized = self.pnl.realized(),
            round_trips = self.pnl.round_trips(),
            "Journal closed"
        );
    }

    pub fn pnl(&self) -> &PnlTracker {
        &self.pnl
    }

    pub fn record(&mut self, event: &TradeEvent) {
        match event {
            TradeEvent::SignalDetected(signal) => {
                info!(
                    instrument = %signal.instrument,
                    direction = %signal.direction,
                    bucket = %signal.bucket,
                    "Signal detected"
                );
            }
            TradeEvent::OrderPlaced {
                instrument,
                side,
                quantity,
                order_id,
            } => {
                info!(instrument = %instrument, side = %side, qty = quantity, order_id = %order_id, "Order placed");
            }
            TradeEvent::OrderFilled {
                instrument,
                order_id,
                side,
                quantity,
                price,
                time,
            } => {
                if !self.pnl.record_fill(order_id, *side, *price, *quantity) {
                    debug!(instrument = %instrument, order_id = %order_id, "Repeated fill report ignored");
                    return;
                }
                info!(instrument = %instrument, side = %side, qty = quantity, price = price, order_id = %order_id, time = %time, "Order filled");
            }
            TradeEvent::OrderRejected {
                instrument,
                order_id,
                reason,
            } => {
                warn!(instrument = %instrument, order_id = %order_id, reason = %reason, "Order rejected");
            }
            TradeEvent::OrderFailed {
                instrument,
                side,
                error,
            } => {
                error!(instrument = %instrument, side = %side, error = %error, "Order failed");
            }
            TradeEvent::TradeOpened { instrument, side } => {
                self.pnl.open_leg();
                info!(instrument = %instrument, side = %side, "Trade opened");
            }
            TradeEvent::TradeClosed { instrument, reason } => {
                match reason {
                    CloseReason::SquaredOff => match self.pnl.close_leg() {
                        Some(trip) => info!(
                            instrument = %instrument,
                            trip_pnl = trip,
                            realized = self.pnl.realized(),
                            round_trips = self.pnl.round_trips(),
                            "Round trip complete"
                        ),
                        None => info!(instrument = %instrument, "Entry fill not seen, round trip not counted"),
                    },
                    CloseReason::ExternallyFlattened => self.pnl.abandon_leg(),
                }
                info!(
                    instrument = %instrument,
                    reason = ?reason,
                    realized = self.pnl.realized(),
                    "Trade closed"
                );
            }
            TradeEvent::ReconciliationFault { detail } => {
                error!(detail = %detail, "Reconciliation fault");
            }
            TradeEvent::LoopFault { error } => {
                error!(error = %error, "Loop fault");
            }
        }
    }
}

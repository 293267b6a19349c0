use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{
    ExecutionGateway, FillOutcome, Instrument, OrderRequest, OrderSide, Result, TradeEvent,
};

/// Extra time allowed on top of the fill timeout before the wait is cut off.
const FILL_GRACE: Duration = Duration::from_secs(5);

/// Submits orders to the gateway and waits on their fills, reporting every
/// outcome on the event channel.
///
/// This is the ONLY component that calls `ExecutionGateway::submit_market_order`.
pub struct OrderExecutor {
    gateway: Arc<dyn ExecutionGateway>,
    events: mpsc::Sender<TradeEvent>,
    quantity: u32,
    fill_timeout: Duration,
}

impl OrderExecutor {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        events: mpsc::Sender<TradeEvent>,
        quantity: u32,
        fill_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            events,
            quantity,
            fill_timeout,
        }
    }

    /// Place a market order for the configured quantity. Returns the order id.
    pub async fn submit(&self, instrument: &Instrument, side: OrderSide) -> Result<String> {
        let order = OrderRequest::market(instrument, side, self.quantity);
        info!(instrument = %instrument, side = %side, qty = order.quantity, "Submitting market order");

        match self.gateway.submit_market_order(&order).await {
            Ok(ack) => {
                info!(instrument = %instrument.code, order_id = %ack.order_id, "Order accepted");
                self.emit(TradeEvent::OrderPlaced {
                    instrument: instrument.code.clone(),
                    side,
                    quantity: order.quantity,
                    order_id: ack.order_id.clone(),
                })
                .await;
                Ok(ack.order_id)
            }
            Err(e) => {
                error!(instrument = %instrument.code, side = %side, error = %e, "Order submission failed");
                self.emit(TradeEvent::OrderFailed {
                    instrument: instrument.code.clone(),
                    side,
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Wait a bounded time for `order_id` to settle. A wait that runs out is
    /// `Pending`, even if the gateway itself does not honour the timeout.
    pub async fn await_fill(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        order_id: &str,
    ) -> Result<FillOutcome> {
        let wait = self.gateway.await_fill(order_id, self.fill_timeout);
        let outcome = match tokio::time::timeout(self.fill_timeout + FILL_GRACE, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(order_id, "Gateway overran the fill timeout");
                Ok(FillOutcome::Pending)
            }
        };

        match &outcome {
            Ok(FillOutcome::Filled { price, time }) => {
                info!(
                    instrument = %instrument.code,
                    side = %side,
                    price = price,
                    order_id,
                    "Order filled"
                );
                self.emit(TradeEvent::OrderFilled {
                    instrument: instrument.code.clone(),
                    order_id: order_id.to_string(),
                    side,
                    quantity: self.quantity,
                    price: *price,
                    time: *time,
                })
                .await;
            }
            Ok(FillOutcome::Pending) => {
                info!(instrument = %instrument.code, order_id, "Order still pending, will re-check");
            }
            Ok(FillOutcome::Rejected { reason }) => {
                warn!(instrument = %instrument.code, order_id, reason = %reason, "Order rejected");
                self.emit(TradeEvent::OrderRejected {
                    instrument: instrument.code.clone(),
                    order_id: order_id.to_string(),
                    reason: reason.clone(),
                })
                .await;
            }
            Err(e) => {
                warn!(instrument = %instrument.code, order_id, error = %e, "Fill query failed, will re-check");
            }
        }

        outcome
    }

    async fn emit(&self, event: TradeEvent) {
        let _ = self.events.send(event).await;
    }
}

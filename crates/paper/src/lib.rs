use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Error, ExecutionGateway, FillOutcome, MarketData, OpenOrder, OrderAck, OrderRequest,
    OrderSide, OrderStatus, Result,
};

struct PaperOrder {
    venue_symbol: String,
    outcome: FillOutcome,
}

/// Simulated execution venue for paper trading.
///
/// Market orders fill immediately at the latest stored tick price with
/// configurable slippage. No real orders are ever sent.
pub struct PaperGateway {
    market: Arc<dyn MarketData>,
    /// Signed net quantity per venue symbol.
    net: Arc<RwLock<HashMap<String, i64>>>,
    /// Every order placed this session, keyed by order id.
    orders: Arc<RwLock<HashMap<String, PaperOrder>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperGateway {
    pub fn new(market: Arc<dyn MarketData>, slippage_bps: f64) -> Self {
        info!(slippage_bps = slippage_bps, "PaperGateway initialized");
        Self {
            market,
            net: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Zero the simulated position for a symbol, as a manual square-off at
    /// the venue would.
    pub async fn flatten(&self, venue_symbol: &str) {
        self.net.write().await.remove(venue_symbol);
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn net_positions(&self) -> Result<HashMap<String, i64>> {
        Ok(self.net.read().await.clone())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        // Paper orders are terminal as soon as they are placed.
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .map(|(id, o)| OpenOrder {
                order_id: id.clone(),
                venue_symbol: o.venue_symbol.clone(),
                status: match o.outcome {
                    FillOutcome::Filled { .. } => OrderStatus::Complete,
                    FillOutcome::Pending => OrderStatus::Open,
                    FillOutcome::Rejected { .. } => OrderStatus::Rejected,
                },
            })
            .collect())
    }

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mid_price = self
            .market
            .latest_price(&order.instrument)
            .await?
            .ok_or_else(|| {
                Error::Gateway(format!(
                    "PaperGateway has no price for '{}'. Ensure ticks are being recorded.",
                    order.instrument.code
                ))
            })?;

        // Apply slippage: buys pay more, sells receive less
        let fill_price = match order.side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        };

        let order_id = uuid::Uuid::new_v4().to_string();
        debug!(
            instrument = %order.instrument.code,
            side = %order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            order_id = %order_id,
            "Paper fill simulated"
        );

        let signed_qty = match order.side {
            OrderSide::Buy => order.quantity as i64,
            OrderSide::Sell => -(order.quantity as i64),
        };
        {
            let mut net = self.net.write().await;
            let qty = net.entry(order.instrument.venue_symbol.clone()).or_insert(0);
            *qty += signed_qty;
            if *qty == 0 {
                net.remove(&order.instrument.venue_symbol);
            }
        }

        self.orders.write().await.insert(
            order_id.clone(),
            PaperOrder {
                venue_symbol: order.instrument.venue_symbol.clone(),
                outcome: FillOutcome::Filled {
                    price: fill_price,
                    time: Utc::now(),
                },
            },
        );

        Ok(OrderAck { order_id })
    }

    async fn await_fill(&self, order_id: &str, _timeout: Duration) -> Result<FillOutcome> {
        self.orders
            .read()
            .await
            .get(order_id)
            .map(|o| o.outcome.clone())
            .ok_or_else(|| Error::Gateway(format!("unknown paper order '{order_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use common::{Instrument, Tick};

    struct FixedPrices(HashMap<String, f64>);

    #[async_trait]
    impl MarketData for FixedPrices {
        async fn ticks_since(&self, _: &Instrument, _: DateTime<Utc>) -> Result<Vec<Tick>> {
            Ok(Vec::new())
        }

        async fn latest_price(&self, instrument: &Instrument) -> Result<Option<f64>> {
            Ok(self.0.get(&instrument.code).copied())
        }
    }

    fn gateway(slippage_bps: f64) -> PaperGateway {
        let prices = FixedPrices(HashMap::from([("HB".to_string(), 1000.0)]));
        PaperGateway::new(Arc::new(prices), slippage_bps)
    }

    fn hdfc() -> Instrument {
        Instrument::new("HB", "HDFCBANK")
    }

    async fn fill_price(gw: &PaperGateway, ack: &OrderAck) -> f64 {
        match gw.await_fill(&ack.order_id, Duration::ZERO).await.unwrap() {
            FillOutcome::Filled { price, .. } => price,
            other => panic!("expected a fill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let gw = gateway(10.0); // 10 bps
        let ack = gw
            .submit_market_order(&OrderRequest::market(&hdfc(), OrderSide::Buy, 1))
            .await
            .unwrap();

        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        let price = fill_price(&gw, &ack).await;
        assert!((price - expected).abs() < 1e-6, "Buy fill price {price}, expected {expected}");
    }

    #[tokio::test]
    async fn paper_sell_fill_applies_negative_slippage() {
        let gw = gateway(10.0);
        let ack = gw
            .submit_market_order(&OrderRequest::market(&hdfc(), OrderSide::Sell, 1))
            .await
            .unwrap();

        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        let price = fill_price(&gw, &ack).await;
        assert!((price - expected).abs() < 1e-6, "Sell fill price {price}, expected {expected}");
    }

    #[tokio::test]
    async fn net_position_tracks_fills() {
        let gw = gateway(0.0);
        gw.submit_market_order(&OrderRequest::market(&hdfc(), OrderSide::Sell, 2))
            .await
            .unwrap();
        assert_eq!(gw.net_positions().await.unwrap().get("HDFCBANK"), Some(&-2));
        assert!(gw.has_pending_activity().await);

        gw.submit_market_order(&OrderRequest::market(&hdfc(), OrderSide::Buy, 2))
            .await
            .unwrap();
        assert!(gw.net_positions().await.unwrap().is_empty());
        assert!(!gw.has_pending_activity().await);
    }

    #[tokio::test]
    async fn flatten_clears_the_position() {
        let gw = gateway(0.0);
        gw.submit_market_order(&OrderRequest::market(&hdfc(), OrderSide::Buy, 1))
            .await
            .unwrap();
        gw.flatten("HDFCBANK").await;
        assert!(gw.net_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_price_is_a_gateway_error() {
        let gw = gateway(0.0);
        let unknown = Instrument::new("ISS", "INFY");
        let err = gw
            .submit_market_order(&OrderRequest::market(&unknown, OrderSide::Buy, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));
        assert!(gw.net_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_order_id_is_an_error() {
        let gw = gateway(0.0);
        assert!(gw.await_fill("nope", Duration::ZERO).await.is_err());
    }
}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use common::{
    Error, ExecutionGateway, FillOutcome, KiteCredentials, OpenOrder, OrderAck, OrderRequest,
    OrderStatus, Result,
};

const BASE_URL: &str = "https://api.kite.trade";
const API_VERSION: &str = "3";

/// How often `await_fill` re-reads the order history.
const FILL_POLL: Duration = Duration::from_millis(250);

/// Exchange timestamps are Indian Standard Time.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// REST client for the Kite Connect v3 API. Used for order placement and
/// position/order queries against an already-authenticated session.
pub struct KiteClient {
    api_key: String,
    access_token: String,
    exchange: String,
    product: String,
    base_url: String,
    http: Client,
}

impl KiteClient {
    pub fn new(
        credentials: &KiteCredentials,
        exchange: impl Into<String>,
        product: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: credentials.api_key.clone(),
            access_token: credentials.access_token.clone(),
            exchange: exchange.into(),
            product: product.into(),
            base_url: BASE_URL.to_string(),
            http,
        })
    }

    /// Point the client at a different host (sandbox or test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        unwrap_envelope(status, &body)
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        unwrap_envelope(status, &body)
    }

    async fn order_history(&self, order_id: &str) -> Result<Vec<HistoryEntry>> {
        self.get(&format!("/orders/{order_id}")).await
    }
}

#[async_trait]
impl ExecutionGateway for KiteClient {
    async fn net_positions(&self) -> Result<HashMap<String, i64>> {
        let positions: PositionsData = self.get("/portfolio/positions").await?;

        let mut net = HashMap::new();
        for p in positions.net {
            *net.entry(p.tradingsymbol).or_insert(0) += p.quantity;
        }
        Ok(net)
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        let orders: Vec<OrderEntry> = self.get("/orders").await?;
        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id,
                venue_symbol: o.tradingsymbol,
                status: OrderStatus::parse(o.status.as_deref().unwrap_or("")),
            })
            .collect())
    }

    async fn submit_market_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let side = order.side.to_string();
        let quantity = order.quantity.to_string();
        let form = [
            ("tradingsymbol", order.instrument.venue_symbol.as_str()),
            ("exchange", self.exchange.as_str()),
            ("transaction_type", side.as_str()),
            ("order_type", "MARKET"),
            ("quantity", quantity.as_str()),
            ("product", self.product.as_str()),
            ("validity", "DAY"),
        ];

        debug!(
            symbol = %order.instrument.venue_symbol,
            side = %side,
            qty = order.quantity,
            "Submitting order to Kite"
        );
        let placed: PlacedOrder = self.post_form("/orders/regular", &form).await?;
        Ok(OrderAck {
            order_id: placed.order_id,
        })
    }

    async fn await_fill(&self, order_id: &str, timeout: Duration) -> Result<FillOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let history = self.order_history(order_id).await?;
            if let Some(outcome) = terminal_outcome(&history) {
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(order_id, "Order not terminal before fill timeout");
                return Ok(FillOutcome::Pending);
            }
            tokio::time::sleep(FILL_POLL.min(deadline - now)).await;
        }
    }
}

/// Decode the `{"status": ..., "data": ...}` envelope every endpoint uses.
fn unwrap_envelope<T: DeserializeOwned>(status: reqwest::StatusCode, body: &str) -> Result<T> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(e) if status.is_success() => return Err(Error::Gateway(format!("bad response: {e}"))),
        Err(_) => return Err(Error::Gateway(format!("HTTP {status}: {body}"))),
    };

    if status.is_success() && envelope.status == "success" {
        return envelope
            .data
            .ok_or_else(|| Error::Gateway("response has no data".to_string()));
    }

    Err(Error::Gateway(format!(
        "HTTP {status} {}: {}",
        envelope.error_type.as_deref().unwrap_or("error"),
        envelope.message.as_deref().unwrap_or("no message")
    )))
}

/// The latest history entry decides; earlier ones are transitions.
fn terminal_outcome(history: &[HistoryEntry]) -> Option<FillOutcome> {
    let last = history.last()?;
    match OrderStatus::parse(last.status.as_deref().unwrap_or("")) {
        OrderStatus::Complete => Some(FillOutcome::Filled {
            price: last.average_price.unwrap_or(0.0),
            time: last
                .exchange_timestamp
                .as_deref()
                .and_then(parse_exchange_time)
                .unwrap_or_else(Utc::now),
        }),
        OrderStatus::Rejected | OrderStatus::Cancelled => Some(FillOutcome::Rejected {
            reason: last
                .status_message
                .clone()
                .or_else(|| last.status.clone())
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

fn parse_exchange_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Ok(t) => t,
        Err(e) => {
            warn!(raw, error = %e, "Unparseable exchange timestamp");
            return None;
        }
    };
    let ist = FixedOffset::east_opt(IST_OFFSET_SECS)?;
    naive
        .and_local_timezone(ist)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct PositionsData {
    #[serde(default)]
    net: Vec<PositionEntry>,
}

#[derive(Deserialize)]
struct PositionEntry {
    tradingsymbol: String,
    quantity: i64,
}

#[derive(Deserialize)]
struct OrderEntry {
    order_id: String,
    #[serde(default)]
    tradingsymbol: String,
    status: Option<String>,
}

#[derive(Deserialize)]
struct PlacedOrder {
    order_id: String,
}

#[derive(Deserialize)]
struct HistoryEntry {
    status: Option<String>,
    average_price: Option<f64>,
    exchange_timestamp: Option<String>,
    status_message: Option<String>,
}

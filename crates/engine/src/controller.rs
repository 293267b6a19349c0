use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{
    CloseReason, Error, ExecutionGateway, FillOutcome, Instrument, MarketData, PositionState,
    Result, Side, Signal, TradeEvent, TradeRecord,
};
use ledger::{LedgerError, TradeLedger};
use strategy::{SignalPipeline, TraderConfig};

use crate::executor::OrderExecutor;

/// Single-position trading state machine.
///
/// Each `tick` advances the position by at most one step:
///
/// ```text
///   Flat ──entry fill──▶ Open ──opposite signal──▶ Exiting ──fill──▶ Flat
///     ▲  ╲                 │ ▲                        │
///     │   Entering ◀───────┘ └──────── reject ────────┘
///     │   (pending fill re-checked each tick)
///     └── venue flat while Open (external square-off)
/// ```
///
/// The ledger is written only after a confirmed fill, and every gateway call
/// is awaited before the next decision.
pub struct Controller {
    cfg: TraderConfig,
    pipeline: SignalPipeline,
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn ExecutionGateway>,
    ledger: Arc<dyn TradeLedger>,
    executor: OrderExecutor,
    events: mpsc::Sender<TradeEvent>,
    state: PositionState,
    reconciled: bool,
}

impl Controller {
    pub fn new(
        cfg: TraderConfig,
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn ExecutionGateway>,
        ledger: Arc<dyn TradeLedger>,
        events: mpsc::Sender<TradeEvent>,
    ) -> Self {
        let executor = OrderExecutor::new(
            gateway.clone(),
            events.clone(),
            cfg.quantity,
            cfg.fill_timeout(),
        );
        Self {
            pipeline: SignalPipeline::from_config(&cfg),
            cfg,
            market,
            gateway,
            ledger,
            executor,
            events,
            state: PositionState::Flat,
            reconciled: false,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    /// Run one poll iteration. Errors are logged and reported as
    /// `LoopFault`; the next tick starts from whatever state was reached.
    pub async fn tick(&mut self) {
        if let Err(e) = self.poll_once().await {
            error!(state = %self.state, error = %e, "Poll iteration failed");
            self.emit(TradeEvent::LoopFault {
                error: e.to_string(),
            })
            .await;
        }
    }

    pub async fn poll_once(&mut self) -> Result<()> {
        if !self.reconciled {
            self.reconcile().await?;
            self.reconciled = true;
        }

        match self.state.clone() {
            PositionState::Flat => self.scan_for_entry().await,
            PositionState::Entering {
                instrument,
                side,
                order_id,
            } => self.settle_entry(instrument, side, order_id).await,
            PositionState::Open(record) => self.manage_open(record).await,
            PositionState::Exiting { record, order_id } => {
                let instrument = self.instrument(&record.instrument)?;
                self.settle_exit(instrument, record, order_id).await
            }
        }
    }

    // ─── Startup ──────────────────────────────────────────────────────────────

    /// Adopt the ledger's view and compare it with the venue. Positions the
    /// ledger does not account for are reported, never adopted.
    async fn reconcile(&mut self) -> Result<()> {
        let record = self.ledger.current().await?;
        let positions = self.gateway.net_positions().await?;

        let tracked = record
            .as_ref()
            .and_then(|r| self.cfg.instrument(&r.instrument))
            .map(|i| i.venue_symbol.clone());

        let mut untracked: Vec<String> = positions
            .iter()
            .filter(|(symbol, qty)| **qty != 0 && Some(*symbol) != tracked.as_ref())
            .map(|(symbol, qty)| format!("{symbol}={qty}"))
            .collect();
        untracked.sort();

        if let Some(r) = record.as_ref().filter(|r| self.cfg.instrument(&r.instrument).is_none()) {
            let detail = format!(
                "ledger trade on '{}' is not a configured instrument; it is closed once the venue is flat",
                r.instrument
            );
            warn!(detail = %detail, "Startup reconciliation fault");
            self.emit(TradeEvent::ReconciliationFault { detail }).await;
        }

        if !untracked.is_empty() {
            let detail = format!(
                "venue positions not in the ledger: {}; new entries stay blocked until they are closed",
                untracked.join(", ")
            );
            warn!(detail = %detail, "Startup reconciliation fault");
            self.emit(TradeEvent::ReconciliationFault { detail }).await;
        }

        match record {
            Some(record) => {
                info!(instrument = %record.instrument, side = %record.side, "Resuming open trade from ledger");
                self.state = PositionState::Open(record);
            }
            None => {
                info!("Ledger is flat at startup");
                self.state = PositionState::Flat;
            }
        }
        Ok(())
    }

    // ─── Flat ─────────────────────────────────────────────────────────────────

    async fn scan_for_entry(&mut self) -> Result<()> {
        if let Some(record) = self.ledger.current().await? {
            warn!(instrument = %record.instrument, "Ledger holds a trade while flat, resuming it");
            self.state = PositionState::Open(record);
            return Ok(());
        }

        if self.gateway.has_pending_activity().await {
            debug!("Venue has pending activity, skipping entry scan");
            return Ok(());
        }

        for instrument in self.cfg.instruments.clone() {
            let signal = match self.evaluate(&instrument).await {
                Ok(Some(signal)) => signal,
                Ok(None) => continue,
                Err(e) => {
                    warn!(instrument = %instrument.code, error = %e, "Market data unavailable");
                    continue;
                }
            };

            info!(instrument = %instrument.code, direction = %signal.direction, bucket = %signal.bucket, "Entry signal");
            let side = signal.direction;
            self.emit(TradeEvent::SignalDetected(signal)).await;

            // First signalling instrument wins this tick, even if the order fails.
            let order_id = match self.executor.submit(&instrument, side.entry_order()).await {
                Ok(id) => id,
                Err(_) => return Ok(()),
            };
            self.state = PositionState::Entering {
                instrument: instrument.clone(),
                side,
                order_id: order_id.clone(),
            };
            return self.settle_entry(instrument, side, order_id).await;
        }

        Ok(())
    }

    // ─── Entering ─────────────────────────────────────────────────────────────

    async fn settle_entry(&mut self, instrument: Instrument, side: Side, order_id: String) -> Result<()> {
        let outcome = self
            .executor
            .await_fill(&instrument, side.entry_order(), &order_id)
            .await?;

        match outcome {
            FillOutcome::Filled { .. } => match self.ledger.open(&instrument.code, side).await {
                Ok(record) => {
                    info!(instrument = %record.instrument, side = %record.side, "Trade opened");
                    self.emit(TradeEvent::TradeOpened {
                        instrument: record.instrument.clone(),
                        side: record.side,
                    })
                    .await;
                    self.state = PositionState::Open(record);
                    Ok(())
                }
                Err(e) if e.is_conflict() => {
                    error!(instrument = %instrument.code, "Ledger already holds a trade after entry fill");
                    self.state = match self.ledger.current().await? {
                        Some(record) => PositionState::Open(record),
                        None => PositionState::Flat,
                    };
                    Err(e.into())
                }
                // Stay Entering; the next tick sees the same fill and retries the write.
                Err(e) => Err(e.into()),
            },
            FillOutcome::Pending => Ok(()),
            FillOutcome::Rejected { .. } => {
                self.state = PositionState::Flat;
                Ok(())
            }
        }
    }

    // ─── Open ─────────────────────────────────────────────────────────────────

    async fn manage_open(&mut self, record: TradeRecord) -> Result<()> {
        let Some(instrument) = self.cfg.instrument(&record.instrument).cloned() else {
            return self.manage_unconfigured(record).await;
        };

        let positions = self.gateway.net_positions().await?;
        let venue_qty = positions.get(&instrument.venue_symbol).copied().unwrap_or(0);
        if venue_qty == 0 {
            return self.heal_external_close(record).await;
        }

        match self.evaluate(&instrument).await? {
            Some(signal) if signal.direction != record.side => {
                info!(
                    instrument = %instrument.code,
                    held = %record.side,
                    direction = %signal.direction,
                    "Opposite signal, squaring off"
                );
                self.emit(TradeEvent::SignalDetected(signal)).await;

                let order_id = match self.executor.submit(&instrument, record.side.exit_order()).await {
                    Ok(id) => id,
                    // Still open; the next opposite signal retries.
                    Err(_) => return Ok(()),
                };
                self.state = PositionState::Exiting {
                    record: record.clone(),
                    order_id: order_id.clone(),
                };
                self.settle_exit(instrument, record, order_id).await
            }
            _ => Ok(()),
        }
    }

    /// The ledger names an instrument that is no longer configured, so its
    /// venue symbol is unknown. A venue with no positions at all means the
    /// trade is gone; anything else is left for the operator.
    async fn manage_unconfigured(&mut self, record: TradeRecord) -> Result<()> {
        let positions = self.gateway.net_positions().await?;
        if positions.values().all(|qty| *qty == 0) {
            return self.heal_external_close(record).await;
        }
        debug!(instrument = %record.instrument, "Open trade is on an unconfigured instrument, holding");
        Ok(())
    }

    async fn heal_external_close(&mut self, record: TradeRecord) -> Result<()> {
        warn!(
            instrument = %record.instrument,
            side = %record.side,
            "Venue shows no position for the open trade, closing it"
        );
        match self.ledger.close().await {
            Ok(_) | Err(LedgerError::NotOpen) => {}
            Err(e) => return Err(e.into()),
        }
        self.emit(TradeEvent::TradeClosed {
            instrument: record.instrument,
            reason: CloseReason::ExternallyFlattened,
        })
        .await;
        self.state = PositionState::Flat;
        Ok(())
    }

    // ─── Exiting ──────────────────────────────────────────────────────────────

    async fn settle_exit(&mut self, instrument: Instrument, record: TradeRecord, order_id: String) -> Result<()> {
        let outcome = self
            .executor
            .await_fill(&instrument, record.side.exit_order(), &order_id)
            .await?;

        match outcome {
            FillOutcome::Filled { .. } => {
                let conflict = match self.ledger.close().await {
                    Ok(_) => None,
                    Err(LedgerError::NotOpen) => {
                        error!(instrument = %record.instrument, "Ledger was already flat at square-off");
                        Some(LedgerError::NotOpen)
                    }
                    // Stay Exiting; the next tick sees the same fill and retries.
                    Err(e) => return Err(e.into()),
                };
                info!(instrument = %record.instrument, "Trade closed");
                self.emit(TradeEvent::TradeClosed {
                    instrument: record.instrument,
                    reason: CloseReason::SquaredOff,
                })
                .await;
                self.state = PositionState::Flat;
                match conflict {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            }
            FillOutcome::Pending => Ok(()),
            FillOutcome::Rejected { .. } => {
                self.state = PositionState::Open(record);
                Ok(())
            }
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    async fn evaluate(&self, instrument: &Instrument) -> Result<Option<Signal>> {
        let since = Utc::now() - self.cfg.lookback();
        let ticks = self.market.ticks_since(instrument, since).await?;
        match self.pipeline.evaluate(&instrument.code, &ticks) {
            Ok(signal) => Ok(signal),
            Err(short) => {
                debug!(instrument = %instrument.code, have = short.have, need = short.need, "Not enough candles yet");
                Ok(None)
            }
        }
    }

    fn instrument(&self, code: &str) -> Result<Instrument> {
        self.cfg.instrument(code).cloned().ok_or_else(|| {
            Error::Config(format!(
                "open trade is on '{code}', which is not a configured instrument"
            ))
        })
    }

    async fn emit(&self, event: TradeEvent) {
        let _ = self.events.send(event).await;
    }
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, ExecutionGateway, MarketData, TradingMode};
use engine::{Controller, Engine, Journal, KiteClient, SqliteTickStore};
use ledger::SqliteLedger;
use paper::PaperGateway;
use strategy::TraderConfig;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().unwrap_or_else(|e| panic!("{e}"));
    let trader_cfg =
        TraderConfig::load(&cfg.trader_config_path).unwrap_or_else(|e| panic!("{e}"));
    let codes: Vec<&str> = trader_cfg.instruments.iter().map(|i| i.code.as_str()).collect();
    info!(
        mode = %cfg.trading_mode,
        instruments = ?codes,
        fast = trader_cfg.ema.fast,
        slow = trader_cfg.ema.slow,
        "Crossbot starting"
    );

    // ── Storage ───────────────────────────────────────────────────────────────
    let ledger = SqliteLedger::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to open trade ledger: {e}"));
    info!("Trade ledger ready");

    let market: Arc<dyn MarketData> = Arc::new(
        SqliteTickStore::connect(&cfg.market_database_url, &cfg.tick_table)
            .await
            .unwrap_or_else(|e| panic!("Failed to open tick store: {e}")),
    );

    // ── Execution gateway (injected based on TRADING_MODE) ────────────────────
    let gateway: Arc<dyn ExecutionGateway> = match (cfg.trading_mode, &cfg.kite) {
        (TradingMode::Live, Some(creds)) => {
            info!(exchange = %cfg.kite_exchange, product = %cfg.kite_product, "Live trading mode, using KiteClient");
            Arc::new(
                KiteClient::new(creds, &cfg.kite_exchange, &cfg.kite_product)
                    .unwrap_or_else(|e| panic!("{e}")),
            )
        }
        (TradingMode::Live, None) => panic!("Live trading mode requires Kite credentials"),
        (TradingMode::Paper, _) => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperGateway");
            Arc::new(PaperGateway::new(market.clone(), cfg.paper_slippage_bps))
        }
    };

    // ── Audit journal ─────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(256);
    let journal_task = tokio::spawn(Journal::new(event_rx).run());

    // ── Engine ────────────────────────────────────────────────────────────────
    let poll_interval = trader_cfg.poll_interval();
    let controller = Controller::new(trader_cfg, market, gateway, Arc::new(ledger), event_tx);
    let (engine, handle) = Engine::new(controller, poll_interval);
    let engine_task = tokio::spawn(engine.run());

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Finishing the current poll.");

    handle.send(EngineCommand::Stop).await;
    if let Err(e) = engine_task.await {
        error!(error = %e, "Engine task ended abnormally");
    }
    // The controller owned the last event sender, so the journal drains and exits.
    let _ = journal_task.await;
    info!("Exiting.");
}

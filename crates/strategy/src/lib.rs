pub mod candles;
pub mod config;
pub mod crossover;
pub mod indicators;

pub use candles::{CandleBuilder, InsufficientData};
pub use config::{EmaSpans, TraderConfig};
pub use crossover::CrossoverDetector;

use common::{Signal, Tick};

/// Candle building and crossover detection for one instrument, combined.
#[derive(Debug, Clone)]
pub struct SignalPipeline {
    builder: CandleBuilder,
    detector: CrossoverDetector,
}

impl SignalPipeline {
    pub fn new(candle_interval: chrono::Duration, spans: EmaSpans) -> Self {
        let detector = CrossoverDetector::new(spans);
        Self {
            builder: CandleBuilder::new(candle_interval, detector.min_candles()),
            detector,
        }
    }

    pub fn from_config(cfg: &TraderConfig) -> Self {
        Self::new(cfg.candle_interval(), cfg.ema)
    }

    /// `Ok(None)` means enough data but no crossover on the last closed bar.
    pub fn evaluate(&self, instrument: &str, ticks: &[Tick]) -> Result<Option<Signal>, InsufficientData> {
        let candles = self.builder.build(instrument, ticks)?;
        Ok(self.detector.detect(&candles))
    }
}

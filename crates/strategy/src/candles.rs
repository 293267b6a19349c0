use chrono::{DateTime, Duration, DurationRound, Utc};
use thiserror::Error;
use tracing::warn;

use common::{Candle, Tick};

/// Not enough closed history to evaluate an instrument yet.
///
/// This is an expected outcome early in a session, not a fault: callers skip
/// the instrument for this poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient data: have {have} candles, need {need}")]
pub struct InsufficientData {
    pub have: usize,
    pub need: usize,
}

/// Resamples a tick series into fixed-width OHLCV candles.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    interval: Duration,
    min_candles: usize,
}

impl CandleBuilder {
    pub fn new(interval: Duration, min_candles: usize) -> Self {
        assert!(interval > Duration::zero(), "candle interval must be positive");
        Self {
            interval,
            min_candles,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn min_candles(&self) -> usize {
        self.min_candles
    }

    /// Resample and require at least `min_candles` bars.
    pub fn build(&self, instrument: &str, ticks: &[Tick]) -> Result<Vec<Candle>, InsufficientData> {
        let candles = self.resample(instrument, ticks);
        if candles.len() < self.min_candles {
            return Err(InsufficientData {
                have: candles.len(),
                need: self.min_candles,
            });
        }
        Ok(candles)
    }

    /// Bucket ticks by interval start, oldest first.
    ///
    /// Volume per bar is the sum of positive successive differences of the
    /// cumulative counter. The difference for the first tick in a bar is taken
    /// against the last tick of the previous bar; a counter reset contributes 0.
    /// Empty buckets produce no bar.
    pub fn resample(&self, instrument: &str, ticks: &[Tick]) -> Vec<Candle> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut prev_volume: Option<f64> = None;

        for tick in ticks {
            if !tick.price.is_finite() {
                continue;
            }
            let bucket = self.bucket_start(tick.timestamp);

            let delta = match prev_volume {
                Some(prev) => (tick.volume - prev).max(0.0),
                None => 0.0,
            };

            match candles.last_mut() {
                Some(bar) if bar.bucket == bucket => {
                    bar.high = bar.high.max(tick.price);
                    bar.low = bar.low.min(tick.price);
                    bar.close = tick.price;
                    bar.volume += delta;
                }
                Some(bar) if bucket < bar.bucket => {
                    warn!(
                        instrument,
                        tick_time = %tick.timestamp,
                        bar_time = %bar.bucket,
                        "Out-of-order tick dropped"
                    );
                    continue;
                }
                _ => candles.push(Candle {
                    instrument: instrument.to_string(),
                    bucket,
                    open: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume: delta,
                }),
            }

            prev_volume = Some(tick.volume);
        }

        candles
    }

    fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.interval).unwrap_or(ts)
    }
}

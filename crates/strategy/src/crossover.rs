use common::{Candle, Side, Signal};

use crate::config::EmaSpans;
use crate::indicators::Ema;

/// Fast/slow EMA crossover detector.
///
/// The last candle in a series is treated as still forming and never
/// influences the decision. The crossover is judged between the two most
/// recent closed bars, with both EMAs warmed over the full history.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverDetector {
    fast: Ema,
    slow: Ema,
}

impl CrossoverDetector {
    pub fn new(spans: EmaSpans) -> Self {
        assert!(
            spans.fast < spans.slow,
            "fast EMA span must be less than slow span"
        );
        Self {
            fast: Ema::new(spans.fast),
            slow: Ema::new(spans.slow),
        }
    }

    /// Bars needed before a signal can be produced: one per slow-span period
    /// plus the forming bar (16 for 5/15).
    pub fn min_candles(&self) -> usize {
        (self.slow.span + 1).max(3)
    }

    /// Detect a crossover completed on the most recent closed bar.
    /// Returns `None` on short input or when the EMAs did not strictly cross.
    pub fn detect(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = self.fast.series(&closes);
        let slow = self.slow.series(&closes);

        let n = candles.len();
        let (prev_fast, prev_slow) = (fast[n - 3], slow[n - 3]);
        let (curr_fast, curr_slow) = (fast[n - 2], slow[n - 2]);

        let direction = if prev_fast < prev_slow && curr_fast > curr_slow {
            Side::Long
        } else if prev_fast > prev_slow && curr_fast < curr_slow {
            Side::Short
        } else {
            return None;
        };

        let closed = &candles[n - 2];
        Some(Signal {
            instrument: closed.instrument.clone(),
            bucket: closed.bucket,
            direction,
        })
    }
}

impl Default for CrossoverDetector {
    fn default() -> Self {
        Self::new(EmaSpans::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                instrument: "HB".into(),
                bucket: start + Duration::minutes(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    /// Falling series, then a jump on the last closed bar, then a forming bar.
    fn cross_up_series() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..18).map(|i| 120.0 - i as f64).collect();
        closes.push(140.0); // last closed bar: fast EMA jumps above slow
        closes.push(140.0); // forming
        closes
    }

    fn cross_down_series() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..18).map(|i| 100.0 + i as f64).collect();
        closes.push(80.0);
        closes.push(80.0);
        closes
    }

    #[test]
    fn default_needs_sixteen_bars() {
        let d = CrossoverDetector::default();
        assert_eq!(d.min_candles(), 16);
        assert!(d.detect(&candles(&[100.0; 15])).is_none());
    }

    #[test]
    fn detects_cross_up() {
        let bars = candles(&cross_up_series());
        let signal = CrossoverDetector::default().detect(&bars).unwrap();
        assert_eq!(signal.direction, Side::Long);
        assert_eq!(signal.instrument, "HB");
        assert_eq!(signal.bucket, bars[bars.len() - 2].bucket);
    }

    #[test]
    fn detects_cross_down() {
        let signal = CrossoverDetector::default()
            .detect(&candles(&cross_down_series()))
            .unwrap();
        assert_eq!(signal.direction, Side::Short);
    }

    #[test]
    fn forming_bar_is_ignored() {
        // Cross happens only on the forming bar → no signal.
        let mut closes: Vec<f64> = (0..19).map(|i| 120.0 - i as f64).collect();
        closes.push(200.0);
        assert!(CrossoverDetector::default().detect(&candles(&closes)).is_none());

        // Changing the forming bar never changes a detected signal.
        let mut a = cross_up_series();
        let mut b = cross_up_series();
        *a.last_mut().unwrap() = 1.0;
        *b.last_mut().unwrap() = 1_000.0;
        let d = CrossoverDetector::default();
        assert_eq!(d.detect(&candles(&a)), d.detect(&candles(&b)));
    }

    #[test]
    fn flat_series_has_no_signal() {
        assert!(CrossoverDetector::default().detect(&candles(&[100.0; 40])).is_none());
    }

    #[test]
    fn monotonic_series_has_no_signal() {
        let up: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let d = CrossoverDetector::default();
        assert!(d.detect(&candles(&up)).is_none());
        assert!(d.detect(&candles(&down)).is_none());
    }

    #[test]
    fn cross_already_in_the_past_is_not_repeated() {
        let mut closes = cross_up_series();
        closes.pop();
        closes.extend([141.0, 142.0, 142.0]);
        assert!(CrossoverDetector::default().detect(&candles(&closes)).is_none());
    }

    #[test]
    fn detection_is_pure() {
        let d = CrossoverDetector::default();
        let up = candles(&cross_up_series());
        let down = candles(&cross_down_series());
        let first = d.detect(&up);
        let _ = d.detect(&down);
        assert_eq!(d.detect(&up), first);
    }
}

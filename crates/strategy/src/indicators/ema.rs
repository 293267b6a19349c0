/// Exponential moving average over a whole close series.
///
/// α = 2 / (span + 1), seeded with the first value (no SMA warm-up), then
/// EMA[i] = α·x[i] + (1 − α)·EMA[i−1]. The output has one value per input.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    pub span: usize,
}

impl Ema {
    pub fn new(span: usize) -> Self {
        assert!(span >= 1, "EMA span must be >= 1");
        Self { span }
    }

    pub fn alpha(&self) -> f64 {
        2.0 / (self.span as f64 + 1.0)
    }

    /// EMA series for `values` (oldest first). Empty in, empty out.
    pub fn series(&self, values: &[f64]) -> Vec<f64> {
        let alpha = self.alpha();
        let mut out = Vec::with_capacity(values.len());
        let mut iter = values.iter();

        let Some(&first) = iter.next() else {
            return out;
        };
        let mut ema = first;
        out.push(ema);

        for &x in iter {
            ema = alpha * x + (1.0 - alpha) * ema;
            out.push(ema);
        }
        out
    }
}

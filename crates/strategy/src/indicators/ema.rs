/// Exponential moving average of close prices.
///
/// `α = 2 / (span + 1)`, seeded with the first close and updated with
/// `ema += α·(close − ema)` (no bias correction), so every bar has a value.
#[derive(Debug, Clone)]
pub struct EmaIndicator {
    pub span: usize,
}

impl EmaIndicator {
    pub fn new(span: usize) -> Self {
        assert!(span >= 1, "EMA span must be >= 1");
        Self { span }
    }

    pub fn alpha(&self) -> f64 {
        2.0 / (self.span as f64 + 1.0)
    }

    /// EMA for every bar of `closes` (oldest first).
    pub fn series(&self, closes: &[f64]) -> Vec<f64> {
        let k = self.alpha();
        let mut out = Vec::with_capacity(closes.len());
        let mut prev: Option<f64> = None;
        for &price in closes {
            let value = match prev {
                None => price,
                Some(p) => p + k * (price - p),
            };
            out.push(value);
            prev = Some(value);
        }
        out
    }

    /// EMA of the latest bar, `None` on an empty slice.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        self.series(closes).last().copied()
    }
}

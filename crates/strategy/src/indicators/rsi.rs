/// Value reported whenever RSI is undefined.
pub const NEUTRAL_RSI: f64 = 50.0;

/// RSI (Relative Strength Index) indicator.
///
/// Average gain and average loss are plain means over the trailing `period`
/// price deltas (no Wilder smoothing). Bars with fewer than `period` deltas
/// behind them read as [`NEUTRAL_RSI`].
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// RSI for every bar of `closes` (oldest first).
    pub fn series(&self, closes: &[f64]) -> Vec<f64> {
        let mut out = vec![NEUTRAL_RSI; closes.len()];
        if closes.len() < self.period + 1 {
            return out;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        // changes[j - 1] is the move into bar j
        for (i, value) in out.iter_mut().enumerate().skip(self.period) {
            let window = &changes[i - self.period..i];
            let avg_gain = window.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
            let avg_loss = window
                .iter()
                .filter(|&&c| c < 0.0)
                .map(|c| c.abs())
                .sum::<f64>()
                / self.period as f64;
            *value = rsi_from_averages(avg_gain, avg_loss);
        }
        out
    }

    /// RSI of the latest bar.
    pub fn compute(&self, closes: &[f64]) -> f64 {
        self.series(closes).last().copied().unwrap_or(NEUTRAL_RSI)
    }
}

/// A window without losses has no finite RS. A window with gains reads as
/// 100; a flat window has no direction at all and reads as neutral.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { NEUTRAL_RSI } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

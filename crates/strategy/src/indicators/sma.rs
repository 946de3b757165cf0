/// Simple moving average: unweighted mean of the trailing `period` closes.
/// Undefined (`None`) until `period` closes are available.
#[derive(Debug, Clone)]
pub struct SmaIndicator {
    pub period: usize,
}

impl SmaIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self { period }
    }

    pub fn series(&self, closes: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; closes.len()];
        if closes.len() < self.period {
            return out;
        }
        for (i, value) in out.iter_mut().enumerate().skip(self.period - 1) {
            let window = &closes[i + 1 - self.period..=i];
            *value = Some(window.iter().sum::<f64>() / self.period as f64);
        }
        out
    }

    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        Some(window.iter().sum::<f64>() / self.period as f64)
    }
}

pub mod ema;
pub mod rsi;
pub mod sma;

pub use ema::EmaIndicator;
pub use rsi::{RsiIndicator, NEUTRAL_RSI};
pub use sma::SmaIndicator;

use serde::{Deserialize, Serialize};

use common::{CandleSeries, Error, Result};

/// Lookback windows of the indicators computed every cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            rsi_period: 14,
            sma_fast: 9,
            sma_slow: 21,
        }
    }
}

impl IndicatorParams {
    /// Shortest series for which every windowed indicator is defined on the
    /// latest bar. EMAs are defined from the first bar and do not count.
    pub fn required_history(&self) -> usize {
        (self.rsi_period + 1).max(self.sma_slow)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ema_fast == 0 || self.ema_slow == 0 || self.sma_fast == 0 || self.sma_slow == 0 {
            return Err(Error::Config("indicator windows must be >= 1".into()));
        }
        if self.rsi_period < 2 {
            return Err(Error::Config("rsi_period must be >= 2".into()));
        }
        Ok(())
    }
}

/// Per-bar indicator values aligned index-for-index with a `CandleSeries`.
///
/// Rebuilt from scratch every cycle; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub close: Vec<f64>,
    pub ema_fast: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub rsi: Vec<f64>,
    pub sma_fast: Vec<Option<f64>>,
    pub sma_slow: Vec<Option<f64>>,
}

impl IndicatorSet {
    pub fn compute(series: &CandleSeries, params: &IndicatorParams) -> Result<Self> {
        let needed = params.required_history();
        if series.len() < needed {
            return Err(Error::InsufficientHistory {
                needed,
                available: series.len(),
            });
        }

        let close = series.closes();
        Ok(Self {
            ema_fast: EmaIndicator::new(params.ema_fast).series(&close),
            ema_slow: EmaIndicator::new(params.ema_slow).series(&close),
            rsi: RsiIndicator::new(params.rsi_period).series(&close),
            sma_fast: SmaIndicator::new(params.sma_fast).series(&close),
            sma_slow: SmaIndicator::new(params.sma_slow).series(&close),
            close,
        })
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Latest-bar view; `None` on an empty set.
    pub fn snapshot(&self) -> Option<IndicatorSnapshot> {
        let last = self.len().checked_sub(1)?;
        let prev = last.checked_sub(1);
        Some(IndicatorSnapshot {
            close: self.close[last],
            ema_fast: self.ema_fast[last],
            ema_slow: self.ema_slow[last],
            rsi: self.rsi[last],
            sma_fast: self.sma_fast[last],
            sma_slow: self.sma_slow[last],
            prev_sma_fast: prev.and_then(|i| self.sma_fast[i]),
            prev_sma_slow: prev.and_then(|i| self.sma_slow[i]),
        })
    }
}

/// Indicator readings of the most recent bar (plus the previous bar's SMAs
/// for crossover detection).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub prev_sma_fast: Option<f64>,
    pub prev_sma_slow: Option<f64>,
}

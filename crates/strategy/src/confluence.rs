use serde::{Deserialize, Serialize};

use common::Action;

use crate::indicators::IndicatorSnapshot;

/// Trend/momentum agreement check shared by `momentum_confluence` and the
/// advisory opinion.
///
/// A CALL has confluence when price sits above the fast EMA and RSI is
/// below the ceiling; a PUT when price sits below the fast EMA and RSI is
/// above the floor. Candidates without confluence lose `penalty` points
/// instead of being discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Confluence {
    pub penalty: f64,
    pub rsi_ceiling: f64,
    pub rsi_floor: f64,
}

impl Default for Confluence {
    fn default() -> Self {
        Self {
            penalty: 20.0,
            rsi_ceiling: 70.0,
            rsi_floor: 30.0,
        }
    }
}

impl Confluence {
    pub fn holds(&self, action: Action, snap: &IndicatorSnapshot) -> bool {
        match action {
            Action::Call => snap.close > snap.ema_fast && snap.rsi < self.rsi_ceiling,
            Action::Put => snap.close < snap.ema_fast && snap.rsi > self.rsi_floor,
            Action::Wait => true,
        }
    }

    /// `confidence` unchanged when confluence holds, otherwise reduced by
    /// the penalty (never below zero).
    pub fn adjust(&self, action: Action, confidence: f64, snap: &IndicatorSnapshot) -> f64 {
        if self.holds(action, snap) {
            confidence
        } else {
            (confidence - self.penalty).max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(close: f64, ema_fast: f64, rsi: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close,
            ema_fast,
            ema_slow: ema_fast,
            rsi,
            sma_fast: None,
            sma_slow: None,
            prev_sma_fast: None,
            prev_sma_slow: None,
        }
    }

    #[test]
    fn call_with_confluence_keeps_confidence() {
        let c = Confluence::default();
        let s = snap(1.3660, 1.3650, 65.0);
        assert!(c.holds(Action::Call, &s));
        assert_eq!(c.adjust(Action::Call, 85.0, &s), 85.0);
    }

    #[test]
    fn call_into_overbought_rsi_is_penalized() {
        let c = Confluence::default();
        let s = snap(1.3660, 1.3650, 75.0);
        assert!(!c.holds(Action::Call, &s));
        assert_eq!(c.adjust(Action::Call, 85.0, &s), 65.0);
    }

    #[test]
    fn put_needs_price_below_ema() {
        let c = Confluence::default();
        assert!(c.holds(Action::Put, &snap(1.3640, 1.3650, 45.0)));
        assert!(!c.holds(Action::Put, &snap(1.3660, 1.3650, 45.0)));
        assert!(!c.holds(Action::Put, &snap(1.3640, 1.3650, 25.0)));
    }

    #[test]
    fn penalty_floors_at_zero() {
        let c = Confluence::default();
        assert_eq!(c.adjust(Action::Put, 10.0, &snap(2.0, 1.0, 50.0)), 0.0);
    }
}

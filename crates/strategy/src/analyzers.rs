//! Built-in candle analyzers. Each one is a pure function of the series and
//! its indicators and emits at most one signal per call.

use common::{Action, CandleSeries, Signal, StrategyId};

use crate::confluence::Confluence;
use crate::indicators::{IndicatorSet, IndicatorSnapshot};
use crate::Strategy;

fn emit(series: &CandleSeries, action: Action, id: &StrategyId, confidence: f64) -> Option<Signal> {
    Signal::new(series.asset(), action, id.clone(), confidence).ok()
}

/// Counter-trend vote over the last three candles: more reds than greens
/// calls, anything else puts (ties favor PUT). Always emits.
pub struct MajorityOfThree {
    pub id: StrategyId,
    pub confidence: f64,
}

impl Strategy for MajorityOfThree {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        3
    }

    fn analyze(&self, series: &CandleSeries, _indicators: &IndicatorSet) -> Option<Signal> {
        let last = series.tail(3)?;
        let greens = last.iter().filter(|c| c.is_green()).count();
        let reds = last.iter().filter(|c| c.is_red()).count();
        let action = if reds > greens { Action::Call } else { Action::Put };
        emit(series, action, &self.id, self.confidence)
    }
}

/// Follows two same-colored candles in a row; mixed or doji pairs are skipped.
pub struct SameDirectionPair {
    pub id: StrategyId,
    pub confidence: f64,
}

impl Strategy for SameDirectionPair {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        2
    }

    fn analyze(&self, series: &CandleSeries, _indicators: &IndicatorSet) -> Option<Signal> {
        let pair = series.tail(2)?;
        let action = if pair.iter().all(|c| c.is_green()) {
            Action::Call
        } else if pair.iter().all(|c| c.is_red()) {
            Action::Put
        } else {
            return None;
        };
        emit(series, action, &self.id, self.confidence)
    }
}

/// Two-candle engulfing pattern. The current body must strictly contain the
/// previous body and the colors must flip.
pub struct Engulfing {
    pub id: StrategyId,
    pub confidence: f64,
}

impl Strategy for Engulfing {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        2
    }

    fn analyze(&self, series: &CandleSeries, _indicators: &IndicatorSet) -> Option<Signal> {
        let pair = series.tail(2)?;
        let (prev, cur) = (&pair[0], &pair[1]);
        let engulfs = cur.body_low() < prev.body_low() && cur.body_high() > prev.body_high();
        if !engulfs {
            return None;
        }
        let action = if prev.is_red() && cur.is_green() {
            Action::Call
        } else if prev.is_green() && cur.is_red() {
            Action::Put
        } else {
            return None;
        };
        emit(series, action, &self.id, self.confidence)
    }
}

/// Trades the fast/slow EMA trend and discounts it when price and RSI do
/// not agree (see [`Confluence`]).
pub struct MomentumConfluence {
    pub id: StrategyId,
    pub confidence: f64,
    pub confluence: Confluence,
}

impl Strategy for MomentumConfluence {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        1
    }

    fn analyze(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Option<Signal> {
        let snap = indicators.snapshot()?;
        let action = if snap.ema_fast > snap.ema_slow {
            Action::Call
        } else if snap.ema_fast < snap.ema_slow {
            Action::Put
        } else {
            return None;
        };
        let confidence = self.confluence.adjust(action, self.confidence, &snap);
        emit(series, action, &self.id, confidence)
    }
}

/// RSI mean reversion: oversold calls, overbought puts.
pub struct RsiExtreme {
    pub id: StrategyId,
    pub confidence: f64,
    pub overbought: f64,
    pub oversold: f64,
}

impl Strategy for RsiExtreme {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        1
    }

    fn analyze(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Option<Signal> {
        let action = rsi_direction(&indicators.snapshot()?, self.oversold, self.overbought)?;
        emit(series, action, &self.id, self.confidence)
    }
}

fn rsi_direction(snap: &IndicatorSnapshot, oversold: f64, overbought: f64) -> Option<Action> {
    if snap.rsi < oversold {
        Some(Action::Call)
    } else if snap.rsi > overbought {
        Some(Action::Put)
    } else {
        None
    }
}

/// Fast SMA crossing the slow SMA on the latest bar.
pub struct SmaCross {
    pub id: StrategyId,
    pub confidence: f64,
}

impl Strategy for SmaCross {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        2
    }

    fn analyze(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Option<Signal> {
        let action = cross_direction(&indicators.snapshot()?)?;
        emit(series, action, &self.id, self.confidence)
    }
}

fn cross_direction(snap: &IndicatorSnapshot) -> Option<Action> {
    let (fast, slow) = (snap.sma_fast?, snap.sma_slow?);
    let (prev_fast, prev_slow) = (snap.prev_sma_fast?, snap.prev_sma_slow?);
    if fast > slow && prev_fast <= prev_slow {
        Some(Action::Call)
    } else if fast < slow && prev_fast >= prev_slow {
        Some(Action::Put)
    } else {
        None
    }
}

/// RSI extreme and SMA cross agreeing on the same bar. Emits only when both
/// point the same way.
pub struct RsiSmaCross {
    pub id: StrategyId,
    pub confidence: f64,
    pub overbought: f64,
    pub oversold: f64,
}

impl Strategy for RsiSmaCross {
    fn id(&self) -> &StrategyId {
        &self.id
    }

    fn min_candles(&self) -> usize {
        2
    }

    fn analyze(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Option<Signal> {
        let snap = indicators.snapshot()?;
        let action = rsi_direction(&snap, self.oversold, self.overbought)?;
        if cross_direction(&snap)? != action {
            return None;
        }
        emit(series, action, &self.id, self.confidence)
    }
}

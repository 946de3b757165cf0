use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use tracing::{info, warn};

use common::{CandleSeries, Error, Result, Signal, Stage, StrategyId};

use crate::advisory::ADVISORY_STRATEGY;
use crate::analyzers::{
    Engulfing, MajorityOfThree, MomentumConfluence, RsiExtreme, RsiSmaCross, SameDirectionPair,
    SmaCross,
};
use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::confluence::Confluence;
use crate::indicators::IndicatorSet;
use crate::Strategy;

/// An analyzer that failed while evaluating; it contributes no candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerFault {
    pub strategy: StrategyId,
    pub stage: Stage,
    pub error: String,
}

/// Output of one registry pass over a series, in registration order.
#[derive(Debug, Default)]
pub struct Candidates {
    pub signals: Vec<Signal>,
    pub faults: Vec<AnalyzerFault>,
}

/// Holds all analyzer instances in registration order.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Build the registry from config. Unknown analyzer types and duplicate
    /// names are configuration faults.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        for cfg in &file_cfg.strategies {
            let strategy = build_strategy(cfg, file_cfg.confluence).map_err(|e| {
                Error::Config(format!("strategy '{}': {e}", cfg.name))
            })?;
            info!(name = %strategy.id(), kind = %cfg.strategy_type, "Registered strategy");
            strategies.push(strategy);
        }
        Self::new(strategies)
    }

    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for s in &strategies {
            if s.id().as_str() == ADVISORY_STRATEGY {
                return Err(Error::Config(format!(
                    "strategy name '{ADVISORY_STRATEGY}' is reserved"
                )));
            }
            if !seen.insert(s.id().clone()) {
                return Err(Error::Config(format!("duplicate strategy name '{}'", s.id())));
            }
        }
        Ok(Self { strategies })
    }

    /// Strategy ids in registration order.
    pub fn order(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Longest candle history any analyzer needs.
    pub fn min_candles(&self) -> usize {
        self.strategies.iter().map(|s| s.min_candles()).max().unwrap_or(0)
    }

    /// Run every analyzer over the series. A panicking analyzer is isolated
    /// and recorded as a fault; the others still run.
    pub fn evaluate(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Candidates {
        let mut out = Candidates::default();
        for strategy in &self.strategies {
            if series.len() < strategy.min_candles() {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| strategy.analyze(series, indicators))) {
                Ok(Some(signal)) => out.signals.push(signal),
                Ok(None) => {}
                Err(payload) => {
                    let error = panic_message(payload.as_ref());
                    warn!(
                        asset = %series.asset(),
                        strategy = %strategy.id(),
                        error = %error,
                        "Analyzer panicked; no candidate this cycle"
                    );
                    out.faults.push(AnalyzerFault {
                        strategy: strategy.id().clone(),
                        stage: Stage::Analyzer,
                        error,
                    });
                }
            }
        }
        out
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "analyzer panicked".to_string()
    }
}

// ─── Strategy builders ────────────────────────────────────────────────────────

fn build_strategy(
    cfg: &StrategyConfig,
    confluence: Confluence,
) -> Result<Box<dyn Strategy>, String> {
    let id = StrategyId::new(cfg.name.clone());
    match cfg.strategy_type.as_str() {
        "majority_of_three" => Ok(Box::new(MajorityOfThree {
            id,
            confidence: param_f64(&cfg.params, "confidence", 70.0),
        })),
        "same_direction_pair" => Ok(Box::new(SameDirectionPair {
            id,
            confidence: param_f64(&cfg.params, "confidence", 65.0),
        })),
        "engulfing" => Ok(Box::new(Engulfing {
            id,
            confidence: param_f64(&cfg.params, "confidence", 75.0),
        })),
        "momentum_confluence" => Ok(Box::new(MomentumConfluence {
            id,
            confidence: param_f64(&cfg.params, "confidence", 85.0),
            confluence: Confluence {
                penalty: param_f64(&cfg.params, "penalty", confluence.penalty),
                ..confluence
            },
        })),
        "rsi_extreme" => Ok(Box::new(RsiExtreme {
            id,
            confidence: param_f64(&cfg.params, "confidence", 70.0),
            overbought: param_f64(&cfg.params, "overbought", 70.0),
            oversold: param_f64(&cfg.params, "oversold", 30.0),
        })),
        "rsi_sma_cross" => Ok(Box::new(RsiSmaCross {
            id,
            confidence: param_f64(&cfg.params, "confidence", 85.0),
            overbought: param_f64(&cfg.params, "overbought", 70.0),
            oversold: param_f64(&cfg.params, "oversold", 30.0),
        })),
        "sma_cross" => Ok(Box::new(SmaCross {
            id,
            confidence: param_f64(&cfg.params, "confidence", 65.0),
        })),
        other => Err(format!("unknown type '{other}'")),
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

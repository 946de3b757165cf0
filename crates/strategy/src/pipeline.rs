use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use common::{CandleSeries, Error, Result, Signal, Stage, StrategyId, StrategyStats};

use crate::advisory::{Advisor, AdvisoryAnalyzer};
use crate::arbitrator::{Arbitrator, Verdict};
use crate::config::StrategyFileConfig;
use crate::confluence::Confluence;
use crate::indicators::{IndicatorParams, IndicatorSet, IndicatorSnapshot};
use crate::registry::{AnalyzerFault, Candidates, StrategyRegistry};

/// Everything one asset produced in one cycle.
#[derive(Debug)]
pub struct Evaluation {
    /// Candidates in registration order; the advisory one, if any, is last.
    pub candidates: Vec<Signal>,
    pub faults: Vec<AnalyzerFault>,
    pub verdict: Verdict,
    pub snapshot: IndicatorSnapshot,
}

/// Indicators, analyzers, the optional advisor and the arbitrator wired
/// together for a single asset evaluation.
pub struct SignalPipeline {
    params: IndicatorParams,
    confluence: Confluence,
    registry: StrategyRegistry,
    advisory: Option<AdvisoryAnalyzer>,
    arbitrator: Arbitrator,
}

impl SignalPipeline {
    pub fn new(
        params: IndicatorParams,
        confluence: Confluence,
        registry: StrategyRegistry,
        arbitrator: Arbitrator,
    ) -> Self {
        Self {
            params,
            confluence,
            registry,
            advisory: None,
            arbitrator,
        }
    }

    pub fn from_config(file_cfg: &StrategyFileConfig, arbitrator: Arbitrator) -> Result<Self> {
        let registry = StrategyRegistry::from_config(file_cfg)?;
        Ok(Self::new(
            file_cfg.indicators.clone(),
            file_cfg.confluence,
            registry,
            arbitrator,
        ))
    }

    /// Register an external advisor. It runs alongside the analyzers, but
    /// its candidate is ranked after theirs and loses ties against them.
    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>, timeout: Duration) -> Self {
        self.advisory = Some(AdvisoryAnalyzer::new(advisor, self.confluence, timeout));
        self
    }

    /// Candles needed for indicators and every analyzer to be defined.
    pub fn required_history(&self) -> usize {
        self.params.required_history().max(self.registry.min_candles())
    }

    pub fn registration_order(&self) -> Vec<StrategyId> {
        let mut order = self.registry.order();
        if let Some(advisory) = &self.advisory {
            order.push(advisory.id().clone());
        }
        order
    }

    pub fn arbitrator(&self) -> &Arbitrator {
        &self.arbitrator
    }

    /// Run one evaluation. Only an indicator failure (short history) aborts;
    /// analyzer and advisory faults are collected and the rest proceeds.
    pub async fn evaluate(
        &self,
        series: &CandleSeries,
        stats: &HashMap<StrategyId, StrategyStats>,
    ) -> Result<Evaluation> {
        let indicators = IndicatorSet::compute(series, &self.params)?;
        let snapshot = indicators.snapshot().ok_or(Error::InsufficientHistory {
            needed: self.required_history(),
            available: 0,
        })?;

        // polled first so the advisor's request is in flight while the
        // analyzers run
        let advice = async {
            match &self.advisory {
                Some(advisory) => {
                    let outcome = advisory.evaluate(series, &indicators).await;
                    Some((advisory.id(), outcome))
                }
                None => None,
            }
        };
        let analyzers = async { self.registry.evaluate(series, &indicators) };
        let (
            advice,
            Candidates {
                mut signals,
                mut faults,
            },
        ) = tokio::join!(advice, analyzers);

        match advice {
            Some((_, Ok(Some(signal)))) => signals.push(signal),
            Some((id, Err(e))) => {
                warn!(asset = %series.asset(), error = %e, "Advisory opinion dropped");
                faults.push(AnalyzerFault {
                    strategy: id.clone(),
                    stage: Stage::Advisory,
                    error: e.to_string(),
                });
            }
            Some((_, Ok(None))) | None => {}
        }

        let verdict = self.arbitrator.arbitrate(&signals, stats);
        debug!(
            asset = %series.asset(),
            candidates = signals.len(),
            faults = faults.len(),
            verdict = ?verdict,
            "Evaluated"
        );

        Ok(Evaluation {
            candidates: signals,
            faults,
            verdict,
            snapshot,
        })
    }
}

use std::collections::HashMap;

use serde::Serialize;

use common::{Action, Signal, StrategyId, StrategyStats};

/// Percentage points a 100% historical win rate adds to a candidate.
pub const DEFAULT_PERFORMANCE_WEIGHT: f64 = 20.0;

/// The candidate chosen for one asset in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub signal: Signal,
    /// Win-rate bonus added to the analyzer's confidence.
    pub bonus: f64,
    pub adjusted_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    Wait,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Verdict {
    NoCandidates,
    Rejected { decision: Decision, reason: RejectReason },
    Actionable(Decision),
}

impl Verdict {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Verdict::NoCandidates => None,
            Verdict::Rejected { decision, .. } | Verdict::Actionable(decision) => Some(decision),
        }
    }
}

/// Picks one signal per asset per cycle.
///
/// Every candidate's confidence is raised by `win_rate × performance_weight`
/// using the settled history of its strategy. The highest adjusted score
/// wins; equal scores keep the candidate that comes first in registration
/// order, so callers must pass candidates in that order.
#[derive(Debug, Clone)]
pub struct Arbitrator {
    min_confidence: f64,
    performance_weight: f64,
}

impl Arbitrator {
    pub fn new(min_confidence: f64, performance_weight: f64) -> Self {
        Self {
            min_confidence,
            performance_weight,
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn bonus(&self, strategy: &StrategyId, stats: &HashMap<StrategyId, StrategyStats>) -> f64 {
        stats
            .get(strategy)
            .and_then(StrategyStats::win_rate)
            .map(|rate| rate * self.performance_weight)
            .unwrap_or(0.0)
    }

    /// Highest adjusted candidate, first-registered on ties.
    pub fn select(
        &self,
        candidates: &[Signal],
        stats: &HashMap<StrategyId, StrategyStats>,
    ) -> Option<Decision> {
        let mut best: Option<Decision> = None;
        for signal in candidates {
            let bonus = self.bonus(&signal.strategy, stats);
            let adjusted = signal.confidence + bonus;
            let better = match &best {
                None => true,
                Some(b) => adjusted > b.adjusted_confidence,
            };
            if better {
                best = Some(Decision {
                    signal: signal.clone(),
                    bonus,
                    adjusted_confidence: adjusted,
                });
            }
        }
        best
    }

    pub fn arbitrate(
        &self,
        candidates: &[Signal],
        stats: &HashMap<StrategyId, StrategyStats>,
    ) -> Verdict {
        let Some(decision) = self.select(candidates, stats) else {
            return Verdict::NoCandidates;
        };
        if decision.signal.action == Action::Wait {
            Verdict::Rejected { decision, reason: RejectReason::Wait }
        } else if decision.adjusted_confidence < self.min_confidence {
            Verdict::Rejected { decision, reason: RejectReason::BelowThreshold }
        } else {
            Verdict::Actionable(decision)
        }
    }
}

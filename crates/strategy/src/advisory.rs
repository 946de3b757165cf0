use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use common::{Action, Candle, CandleSeries, Error, Result, Signal, StrategyId};

use crate::confluence::Confluence;
use crate::indicators::{IndicatorSet, IndicatorSnapshot};

/// Strategy id under which advisory opinions enter arbitration.
pub const ADVISORY_STRATEGY: &str = "advisory";

/// Candles handed to the advisor along with the indicator snapshot.
pub const ADVISORY_LOOKBACK: usize = 20;

/// An external opinion about the next move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Opinion {
    pub action: Action,
    pub confidence: f64,
}

/// Optional external opinion source (for example a language model behind an
/// HTTP API). Failures are reported as `Error::Advisory`.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn opine(
        &self,
        asset: &str,
        recent: &[Candle],
        indicators: &IndicatorSnapshot,
    ) -> Result<Opinion>;
}

/// Turns an [`Advisor`] into a regular candidate: the opinion gets the same
/// confluence penalty as the momentum analyzer and is bounded in time.
pub struct AdvisoryAnalyzer {
    id: StrategyId,
    advisor: Arc<dyn Advisor>,
    confluence: Confluence,
    timeout: Duration,
}

impl AdvisoryAnalyzer {
    pub fn new(advisor: Arc<dyn Advisor>, confluence: Confluence, timeout: Duration) -> Self {
        Self {
            id: StrategyId::from(ADVISORY_STRATEGY),
            advisor,
            confluence,
            timeout,
        }
    }

    pub fn id(&self) -> &StrategyId {
        &self.id
    }

    pub async fn evaluate(
        &self,
        series: &CandleSeries,
        indicators: &IndicatorSet,
    ) -> Result<Option<Signal>> {
        let Some(snap) = indicators.snapshot() else {
            return Ok(None);
        };
        let candles = series.candles();
        let recent = &candles[candles.len().saturating_sub(ADVISORY_LOOKBACK)..];

        let opinion = tokio::time::timeout(
            self.timeout,
            self.advisor.opine(series.asset(), recent, &snap),
        )
        .await
        .map_err(|_| Error::Advisory(format!("no opinion within {:?}", self.timeout)))?
        .map_err(|e| match e {
            Error::Advisory(_) => e,
            other => Error::Advisory(other.to_string()),
        })?;

        let confidence = self.confluence.adjust(opinion.action, opinion.confidence, &snap);
        debug!(
            asset = %series.asset(),
            action = %opinion.action,
            raw = opinion.confidence,
            adjusted = confidence,
            "Advisory opinion received"
        );
        Signal::new(series.asset(), opinion.action, self.id.clone(), confidence).map(Some)
    }
}

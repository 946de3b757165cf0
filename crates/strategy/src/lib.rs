pub mod advisory;
pub mod analyzers;
pub mod arbitrator;
pub mod config;
pub mod confluence;
pub mod indicators;
pub mod pipeline;
pub mod registry;

pub use advisory::{Advisor, AdvisoryAnalyzer, Opinion, ADVISORY_STRATEGY};
pub use arbitrator::{Arbitrator, Decision, RejectReason, Verdict, DEFAULT_PERFORMANCE_WEIGHT};
pub use config::{StrategyConfig, StrategyFileConfig};
pub use confluence::Confluence;
pub use indicators::{IndicatorParams, IndicatorSet, IndicatorSnapshot};
pub use pipeline::{Evaluation, SignalPipeline};
pub use registry::{AnalyzerFault, Candidates, StrategyRegistry};

use common::{CandleSeries, Signal, StrategyId};

/// All analyzer implementations must satisfy this trait.
pub trait Strategy: Send + Sync {
    /// Id of this analyzer instance. Keys its win/loss statistics.
    fn id(&self) -> &StrategyId;

    /// Candles that must be present before `analyze` is called.
    fn min_candles(&self) -> usize;

    /// Inspect the closed candles of one asset and optionally emit a signal.
    ///
    /// Must be pure: the same series and indicators always give the same
    /// answer. Returns `None` if the pattern is absent.
    fn analyze(&self, series: &CandleSeries, indicators: &IndicatorSet) -> Option<Signal>;
}

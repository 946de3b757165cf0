use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One OHLCV sample for a fixed period, as delivered by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// Lower edge of the real body.
    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Upper edge of the real body.
    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }
}

/// Ordered candle history for one asset, oldest first.
///
/// Open times must be strictly increasing. Gaps between candles are
/// tolerated and not checked.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    asset: String,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(asset: impl Into<String>, candles: Vec<Candle>) -> Result<Self> {
        let asset = asset.into();
        if let Some(w) = candles.windows(2).find(|w| w[1].open_time <= w[0].open_time) {
            return Err(Error::InvalidSeries(format!(
                "{asset}: open time {} does not follow {}",
                w[1].open_time, w[0].open_time
            )));
        }
        Ok(Self { asset, candles })
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// The trailing `n` candles, or `None` when fewer exist.
    pub fn tail(&self, n: usize) -> Option<&[Candle]> {
        let len = self.candles.len();
        (len >= n).then(|| &self.candles[len - n..])
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

/// Direction of a binary trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Action {
    Call,
    Put,
    Wait,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Call => write!(f, "CALL"),
            Action::Put => write!(f, "PUT"),
            Action::Wait => write!(f, "WAIT"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CALL" => Ok(Action::Call),
            "PUT" => Ok(Action::Put),
            "WAIT" | "HOLD" => Ok(Action::Wait),
            other => Err(Error::InvalidSignal(format!("unknown action '{other}'"))),
        }
    }
}

/// Name of a registered analyzer. Keys the per-strategy statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(String);

impl StrategyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A candidate decision produced by one analyzer for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub asset: String,
    pub action: Action,
    pub strategy: StrategyId,
    /// Percentage in `[0, 100]`.
    pub confidence: f64,
}

impl Signal {
    pub fn new(
        asset: impl Into<String>,
        action: Action,
        strategy: StrategyId,
        confidence: f64,
    ) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(Error::InvalidSignal(format!(
                "{strategy}: confidence {confidence} outside 0..=100"
            )));
        }
        Ok(Self {
            asset: asset.into(),
            action,
            strategy,
            confidence,
        })
    }
}

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of a binary order sent to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub asset: String,
    pub action: Action,
    pub stake: f64,
    pub duration_minutes: u32,
}

/// Lifecycle position of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeState {
    #[default]
    Idle,
    Opening,
    Open,
    Settling,
    Won,
    Lost,
    Tied,
    Closed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeState::Idle => "idle",
            TradeState::Opening => "opening",
            TradeState::Open => "open",
            TradeState::Settling => "settling",
            TradeState::Won => "won",
            TradeState::Lost => "lost",
            TradeState::Tied => "tied",
            TradeState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An order accepted by the broker and tracked until settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: OrderId,
    pub asset: String,
    pub action: Action,
    pub strategy: StrategyId,
    pub stake: f64,
    pub martingale_level: u32,
    pub duration_minutes: u32,
    pub opened_at: DateTime<Utc>,
    pub state: TradeState,
}

/// Settlement result derived from the broker's net profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
    Tie,
}

impl Outcome {
    pub fn from_profit(profit: f64) -> Self {
        if profit > 0.0 {
            Outcome::Win
        } else if profit < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Tie
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
            Outcome::Tie => write!(f, "TIE"),
        }
    }
}

/// Settled win/loss counts for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub wins: u64,
    pub losses: u64,
}

impl StrategyStats {
    pub fn settled(&self) -> u64 {
        self.wins + self.losses
    }

    /// Fraction of settled trades that won; `None` before the first settlement.
    pub fn win_rate(&self) -> Option<f64> {
        match self.settled() {
            0 => None,
            n => Some(self.wins as f64 / n as f64),
        }
    }
}

/// Append-only row written once per settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
    pub asset: String,
    pub action: Action,
    pub strategy: StrategyId,
    pub stake: f64,
    pub martingale_level: u32,
    pub outcome: Outcome,
    pub profit: f64,
    pub bankroll: f64,
}

/// Where in the pipeline a locally handled fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Clock,
    Candles,
    Indicators,
    Analyzer,
    Advisory,
    Order,
    Settlement,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Clock => "clock",
            Stage::Candles => "candles",
            Stage::Indicators => "indicators",
            Stage::Analyzer => "analyzer",
            Stage::Advisory => "advisory",
            Stage::Order => "order",
            Stage::Settlement => "settlement",
            Stage::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// Fire-and-forget event stream produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    SignalDecision {
        signal: Signal,
        adjusted_confidence: f64,
        actionable: bool,
        price: f64,
    },
    TradeOpened {
        trade: Trade,
    },
    TradeSettled {
        record: SettlementRecord,
    },
    Fault {
        asset: Option<String>,
        stage: Stage,
        error: String,
    },
}

/// Current state of the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Commands sent to the scheduler via its command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Pause,
    Resume,
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candle(minute: i64, open: f64, close: f64) -> Candle {
        Candle {
            open_time: DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minute),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn series_rejects_out_of_order_candles() {
        let candles = vec![candle(1, 1.0, 2.0), candle(0, 2.0, 3.0)];
        assert!(matches!(
            CandleSeries::new("EURUSD", candles),
            Err(Error::InvalidSeries(_))
        ));
    }

    #[test]
    fn series_tolerates_gaps() {
        let candles = vec![candle(0, 1.0, 2.0), candle(5, 2.0, 3.0)];
        let series = CandleSeries::new("EURUSD", candles).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.tail(2).unwrap().len(), 2);
        assert!(series.tail(3).is_none());
    }

    #[test]
    fn signal_rejects_out_of_range_confidence() {
        assert!(Signal::new("EURUSD", Action::Call, "x".into(), 101.0).is_err());
        assert!(Signal::new("EURUSD", Action::Call, "x".into(), f64::NAN).is_err());
        assert!(Signal::new("EURUSD", Action::Put, "x".into(), 0.0).is_ok());
    }

    #[test]
    fn outcome_follows_profit_sign() {
        assert_eq!(Outcome::from_profit(1.7), Outcome::Win);
        assert_eq!(Outcome::from_profit(-2.0), Outcome::Loss);
        assert_eq!(Outcome::from_profit(0.0), Outcome::Tie);
    }

    #[test]
    fn win_rate_undefined_before_first_settlement() {
        assert_eq!(StrategyStats::default().win_rate(), None);
        let stats = StrategyStats { wins: 3, losses: 1 };
        assert_eq!(stats.win_rate(), Some(0.75));
    }

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("call".parse::<Action>().unwrap(), Action::Call);
        assert_eq!(" PUT ".parse::<Action>().unwrap(), Action::Put);
        assert!("buy".parse::<Action>().is_err());
    }
}

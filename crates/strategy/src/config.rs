use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

use crate::confluence::Confluence;
use crate::indicators::IndicatorParams;

/// Top-level strategy config file (TOML).
///
/// Analyzers are registered in file order, which is also the arbitration
/// tie-break order.
///
/// Example `config/strategies.toml`:
/// ```toml
/// [indicators]
/// ema_fast = 20
/// rsi_period = 14
///
/// [confluence]
/// penalty = 20.0
///
/// [[strategy]]
/// type = "majority_of_three"
/// name = "majority_of_three"
///
/// [strategy.params]
/// confidence = 70.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(default)]
    pub indicators: IndicatorParams,
    #[serde(default)]
    pub confluence: Confluence,
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Analyzer type identifier, e.g. "engulfing".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Strategy id: shown in logs, keys the win/loss statistics.
    pub name: String,
    /// Analyzer-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("Failed to parse strategy config at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.indicators.validate()?;
        Ok(cfg)
    }
}

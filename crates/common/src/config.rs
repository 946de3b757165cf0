use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Assets scanned when `ASSETS` is not set.
pub const DEFAULT_ASSETS: [&str; 5] = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD"];

/// How the stake of a fresh (non-martingale) trade is sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StakeMode {
    /// The same amount every time.
    Fixed { amount: f64 },
    /// A fraction of the current balance, never below `min`.
    Fraction { fraction: f64, min: f64 },
}

/// What a martingale retry goes through after a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MartingaleGate {
    /// Re-open immediately on the same asset/action/strategy, skipping the
    /// scheduler boundary and the arbitrator.
    #[default]
    Bypass,
    /// Book the loss and escalate the stake of the next arbitrated trade on
    /// the same asset.
    Carry,
}

/// All configuration loaded from environment variables at startup.
/// Every variable has a default; malformed values are a configuration fault.
#[derive(Debug, Clone)]
pub struct Config {
    // Market
    pub assets: Vec<String>,
    pub candle_period_secs: u32,
    pub candle_count: usize,
    pub trade_duration_minutes: u32,

    // Scheduling
    pub boundary_offset_secs: u32,
    pub poll_interval_ms: u64,
    pub debounce_secs: u64,

    // Arbitration
    pub min_confidence: f64,
    pub performance_weight: f64,
    pub advisory_timeout_secs: u64,

    // Money management
    pub stake_mode: StakeMode,
    pub martingale_enabled: bool,
    pub martingale_factor: f64,
    pub martingale_max_level: u32,
    pub martingale_gate: MartingaleGate,
    pub cooldown_secs: u64,
    pub settlement_margin_secs: u64,
    pub initial_balance: f64,

    // Paper venue
    pub paper_payout: f64,

    // Persistence / outputs
    pub database_url: String,
    pub strategy_config_path: String,
    pub telemetry_url: Option<String>,
    /// Optional external advisor endpoint.
    pub advisory_url: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let assets = match lookup("ASSETS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
        };

        let stake_mode = match lookup("STAKE_MODE")
            .unwrap_or_else(|| "fixed".to_string())
            .to_lowercase()
            .as_str()
        {
            "fixed" => StakeMode::Fixed {
                amount: parse(&lookup, "FIXED_STAKE", 2.0)?,
            },
            "fraction" => StakeMode::Fraction {
                fraction: parse(&lookup, "STAKE_FRACTION", 0.01)?,
                min: parse(&lookup, "MIN_STAKE", 1.0)?,
            },
            other => {
                return Err(Error::Config(format!(
                    "STAKE_MODE must be 'fixed' or 'fraction', got: '{other}'"
                )))
            }
        };

        let martingale_gate = match lookup("MARTINGALE_GATE")
            .unwrap_or_else(|| "bypass".to_string())
            .to_lowercase()
            .as_str()
        {
            "bypass" => MartingaleGate::Bypass,
            "carry" => MartingaleGate::Carry,
            other => {
                return Err(Error::Config(format!(
                    "MARTINGALE_GATE must be 'bypass' or 'carry', got: '{other}'"
                )))
            }
        };

        let cfg = Config {
            assets,
            candle_period_secs: parse(&lookup, "CANDLE_PERIOD_SECS", 60)?,
            candle_count: parse(&lookup, "CANDLE_COUNT", 100)?,
            trade_duration_minutes: parse(&lookup, "TRADE_DURATION_MINUTES", 1)?,
            boundary_offset_secs: parse(&lookup, "BOUNDARY_OFFSET_SECS", 2)?,
            poll_interval_ms: parse(&lookup, "POLL_INTERVAL_MS", 250)?,
            debounce_secs: parse(&lookup, "DEBOUNCE_SECS", 5)?,
            min_confidence: parse(&lookup, "MIN_CONFIDENCE", 65.0)?,
            performance_weight: parse(&lookup, "PERFORMANCE_WEIGHT", 20.0)?,
            advisory_timeout_secs: parse(&lookup, "ADVISORY_TIMEOUT_SECS", 10)?,
            stake_mode,
            martingale_enabled: parse(&lookup, "MARTINGALE_ENABLED", true)?,
            martingale_factor: parse(&lookup, "MARTINGALE_FACTOR", 2.2)?,
            martingale_max_level: parse(&lookup, "MARTINGALE_MAX_LEVEL", 1)?,
            martingale_gate,
            cooldown_secs: parse(&lookup, "COOLDOWN_SECS", 60)?,
            settlement_margin_secs: parse(&lookup, "SETTLEMENT_MARGIN_SECS", 3)?,
            initial_balance: parse(&lookup, "INITIAL_BALANCE", 10_000.0)?,
            paper_payout: parse(&lookup, "PAPER_PAYOUT", 0.85)?,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://optibot.db?mode=rwc".to_string()),
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            telemetry_url: lookup("TELEMETRY_URL").filter(|s| !s.trim().is_empty()),
            advisory_url: lookup("ADVISORY_URL").filter(|s| !s.trim().is_empty()),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let (stake, floor) = match self.stake_mode {
            StakeMode::Fixed { amount } => (("FIXED_STAKE", amount), None),
            StakeMode::Fraction { fraction, min } => {
                (("STAKE_FRACTION", fraction), Some(("MIN_STAKE", min)))
            }
        };
        let numbers = [
            ("MIN_CONFIDENCE", self.min_confidence),
            ("PERFORMANCE_WEIGHT", self.performance_weight),
            ("MARTINGALE_FACTOR", self.martingale_factor),
            ("INITIAL_BALANCE", self.initial_balance),
            ("PAPER_PAYOUT", self.paper_payout),
            stake,
        ];
        // `parse::<f64>` accepts "NaN" and "inf", which slip past range checks
        if let Some((key, value)) = numbers
            .into_iter()
            .chain(floor)
            .find(|(_, v)| !v.is_finite())
        {
            return Err(Error::Config(format!("{key} must be a finite number, got {value}")));
        }

        if self.assets.is_empty() {
            return Err(Error::Config("ASSETS must name at least one asset".into()));
        }
        if self.candle_period_secs == 0 {
            return Err(Error::Config("CANDLE_PERIOD_SECS must be positive".into()));
        }
        if self.boundary_offset_secs >= self.candle_period_secs {
            return Err(Error::Config(format!(
                "BOUNDARY_OFFSET_SECS ({}) must be smaller than CANDLE_PERIOD_SECS ({})",
                self.boundary_offset_secs, self.candle_period_secs
            )));
        }
        if self.trade_duration_minutes == 0 {
            return Err(Error::Config("TRADE_DURATION_MINUTES must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(Error::Config("MIN_CONFIDENCE must be within 0..=100".into()));
        }
        if self.martingale_factor <= 2.0 {
            return Err(Error::Config(format!(
                "MARTINGALE_FACTOR must exceed 2 to recover the prior loss, got {}",
                self.martingale_factor
            )));
        }
        match self.stake_mode {
            StakeMode::Fixed { amount } if amount <= 0.0 => {
                Err(Error::Config("FIXED_STAKE must be positive".into()))
            }
            StakeMode::Fraction { fraction, min }
                if fraction <= 0.0 || fraction > 1.0 || min <= 0.0 =>
            {
                Err(Error::Config(
                    "STAKE_FRACTION must be in (0, 1] and MIN_STAKE positive".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

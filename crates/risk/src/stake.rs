use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Config, MartingaleGate, StakeMode};

/// Sizes the stake of a fresh trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakePolicy {
    pub mode: StakeMode,
}

impl StakePolicy {
    pub fn new(mode: StakeMode) -> Self {
        Self { mode }
    }

    pub fn base_stake(&self, balance: f64) -> f64 {
        match self.mode {
            StakeMode::Fixed { amount } => amount,
            StakeMode::Fraction { fraction, min } => (balance * fraction).max(min),
        }
    }
}

/// Loss-recovery rule: after a LOSS below `max_level`, re-enter with the
/// stake multiplied by `factor`. A factor above 2 makes a winning retry
/// recover the prior loss at typical payouts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MartingalePolicy {
    pub enabled: bool,
    pub factor: f64,
    pub max_level: u32,
    pub gate: MartingaleGate,
}

impl Default for MartingalePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: 2.2,
            max_level: 1,
            gate: MartingaleGate::Bypass,
        }
    }
}

impl MartingalePolicy {
    /// Stake and level of the retry that follows a loss at `level`, or
    /// `None` when the sequence ends here.
    pub fn next(&self, stake: f64, level: u32) -> Option<(f64, u32)> {
        if !self.enabled || level >= self.max_level {
            return None;
        }
        Some((stake * self.factor, level + 1))
    }
}

/// Money-management parameters of the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stake: StakePolicy,
    pub martingale: MartingalePolicy,
    /// Quiet period after a WIN before the asset may trade again.
    pub cooldown: Duration,
    /// Wait past expiry before querying the outcome.
    pub settlement_margin: Duration,
    pub trade_duration_minutes: u32,
}

impl RiskConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            stake: StakePolicy::new(cfg.stake_mode),
            martingale: MartingalePolicy {
                enabled: cfg.martingale_enabled,
                factor: cfg.martingale_factor,
                max_level: cfg.martingale_max_level,
                gate: cfg.martingale_gate,
            },
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            settlement_margin: Duration::from_secs(cfg.settlement_margin_secs),
            trade_duration_minutes: cfg.trade_duration_minutes,
        }
    }

    /// Time from opening a trade to querying its outcome.
    pub fn settlement_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.trade_duration_minutes) * 60) + self.settlement_margin
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stake: StakePolicy::new(StakeMode::Fixed { amount: 2.0 }),
            martingale: MartingalePolicy::default(),
            cooldown: Duration::from_secs(60),
            settlement_margin: Duration::from_secs(3),
            trade_duration_minutes: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stake_ignores_balance() {
        let p = StakePolicy::new(StakeMode::Fixed { amount: 2.0 });
        assert_eq!(p.base_stake(10.0), 2.0);
        assert_eq!(p.base_stake(10_000.0), 2.0);
    }

    #[test]
    fn fractional_stake_has_a_floor() {
        let p = StakePolicy::new(StakeMode::Fraction { fraction: 0.01, min: 1.0 });
        assert_eq!(p.base_stake(500.0), 5.0);
        assert_eq!(p.base_stake(50.0), 1.0);
    }

    #[test]
    fn single_retry_at_default_level() {
        let m = MartingalePolicy::default();
        let (stake, level) = m.next(2.0, 0).unwrap();
        assert!((stake - 4.4).abs() < 1e-9);
        assert_eq!(level, 1);
        assert_eq!(m.next(stake, level), None);
    }

    #[test]
    fn disabled_martingale_never_retries() {
        let m = MartingalePolicy { enabled: false, ..MartingalePolicy::default() };
        assert_eq!(m.next(2.0, 0), None);
    }

    #[test]
    fn settlement_delay_includes_margin() {
        assert_eq!(RiskConfig::default().settlement_delay(), Duration::from_secs(63));
    }
}

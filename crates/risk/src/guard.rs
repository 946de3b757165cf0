use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Why an asset cannot take a new trade right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// A trade (or martingale sequence) is already open on it.
    Busy,
    CoolingDown { remaining: Duration },
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::Busy => write!(f, "asset busy"),
            Ineligible::CoolingDown { remaining } => {
                write!(f, "cooling down for {}s", remaining.as_secs())
            }
        }
    }
}

#[derive(Debug, Default)]
struct GuardState {
    active: HashSet<String>,
    cooldowns: HashMap<String, Instant>,
}

impl GuardState {
    fn check(&self, asset: &str, now: Instant) -> Result<(), Ineligible> {
        if self.active.contains(asset) {
            return Err(Ineligible::Busy);
        }
        match self.cooldowns.get(asset) {
            Some(&until) if until > now => Err(Ineligible::CoolingDown {
                remaining: until - now,
            }),
            _ => Ok(()),
        }
    }
}

/// The active-trade set and the cooldown set behind one lock.
///
/// `try_acquire` checks both and marks the asset busy in a single critical
/// section, which is what makes "at most one open trade per asset" hold
/// even when the scheduler and a martingale retry race for the same asset.
#[derive(Debug, Clone)]
pub struct AssetGuard {
    state: Arc<RwLock<GuardState>>,
    cooldown: Duration,
}

impl AssetGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(GuardState::default())),
            cooldown,
        }
    }

    pub async fn eligibility(&self, asset: &str) -> Result<(), Ineligible> {
        self.state.read().await.check(asset, Instant::now())
    }

    pub async fn is_eligible(&self, asset: &str) -> bool {
        self.eligibility(asset).await.is_ok()
    }

    pub async fn is_active(&self, asset: &str) -> bool {
        self.state.read().await.active.contains(asset)
    }

    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    /// Reserve the asset for a new trade.
    pub async fn try_acquire(&self, asset: &str) -> Result<(), Ineligible> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.check(asset, now)?;
        state.cooldowns.retain(|_, until| *until > now);
        state.active.insert(asset.to_string());
        debug!(asset = %asset, "Asset reserved");
        Ok(())
    }

    /// Free the asset without a cooldown (rejected order, tie, lost
    /// settlement).
    pub async fn release(&self, asset: &str) {
        self.state.write().await.active.remove(asset);
        debug!(asset = %asset, "Asset released");
    }

    /// Free the asset and block new entries on it for the cooldown period.
    pub async fn release_with_cooldown(&self, asset: &str) {
        let until = Instant::now() + self.cooldown;
        let mut state = self.state.write().await;
        state.active.remove(asset);
        state.cooldowns.insert(asset.to_string(), until);
        debug!(asset = %asset, cooldown_secs = self.cooldown.as_secs(), "Asset cooling down");
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use common::{Outcome, StrategyId, StrategyStats};

/// Point-in-time copy of bankroll and per-strategy statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub balance: f64,
    pub stats: HashMap<StrategyId, StrategyStats>,
}

/// Bankroll and win/loss statistics shared between the lifecycle manager
/// (the only writer) and the scheduler (reads snapshots for arbitration).
///
/// Every mutation happens under one write lock, so a settlement updates
/// balance and statistics together or not at all.
#[derive(Debug, Clone)]
pub struct PerformanceLedger {
    state: Arc<RwLock<LedgerSnapshot>>,
}

impl PerformanceLedger {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerSnapshot {
                balance: initial_balance,
                stats: HashMap::new(),
            })),
        }
    }

    /// Start with zeroed statistics for every registered strategy.
    pub fn with_strategies(
        initial_balance: f64,
        strategies: impl IntoIterator<Item = StrategyId>,
    ) -> Self {
        let stats = strategies
            .into_iter()
            .map(|id| (id, StrategyStats::default()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(LedgerSnapshot {
                balance: initial_balance,
                stats,
            })),
        }
    }

    pub async fn balance(&self) -> f64 {
        self.state.read().await.balance
    }

    pub async fn stats(&self) -> HashMap<StrategyId, StrategyStats> {
        self.state.read().await.stats.clone()
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.read().await.clone()
    }

    /// Book a final settlement. WIN and LOSS move the balance by the
    /// broker-reported profit and bump the strategy's counter; TIE changes
    /// nothing. Returns the outcome and the resulting balance. Losses on
    /// a known stake go through [`PerformanceLedger::record_loss`].
    pub async fn record(&self, strategy: &StrategyId, profit: f64) -> (Outcome, f64) {
        let outcome = Outcome::from_profit(profit);
        let balance = self.apply(strategy, outcome, profit).await;
        info!(strategy = %strategy, outcome = %outcome, profit, balance, "Ledger updated");
        (outcome, balance)
    }

    /// Book a final LOSS: the strategy's loss counter goes up and the
    /// balance drops by exactly `stake`, whatever the broker reported.
    pub async fn record_loss(&self, strategy: &StrategyId, stake: f64) -> f64 {
        let balance = self.apply(strategy, Outcome::Loss, -stake.abs()).await;
        info!(strategy = %strategy, outcome = %Outcome::Loss, stake, balance, "Ledger updated");
        balance
    }

    /// Count `outcome` against the strategy (TIE counts nothing) and move
    /// the balance by `delta`, under one lock.
    pub async fn apply(&self, strategy: &StrategyId, outcome: Outcome, delta: f64) -> f64 {
        let mut state = self.state.write().await;
        state.balance += delta;
        match outcome {
            Outcome::Win => state.stats.entry(strategy.clone()).or_default().wins += 1,
            Outcome::Loss => state.stats.entry(strategy.clone()).or_default().losses += 1,
            Outcome::Tie => {}
        }
        state.balance
    }

    /// Move the balance without touching statistics. Used for a loss that
    /// is followed by a martingale retry: the money is gone, but the
    /// sequence is only counted once it ends.
    pub async fn adjust_balance(&self, delta: f64) -> f64 {
        let mut state = self.state.write().await;
        state.balance += delta;
        state.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn win_and_loss_bookkeeping_is_exact() {
        let ledger = PerformanceLedger::with_strategies(100.0, vec![StrategyId::from("a")]);
        let id = StrategyId::from("a");

        assert_eq!(ledger.record(&id, 1.5).await, (Outcome::Win, 101.5));
        assert_eq!(ledger.record(&id, -2.0).await, (Outcome::Loss, 99.5));

        let snap = ledger.snapshot().await;
        assert_eq!(snap.stats[&id], StrategyStats { wins: 1, losses: 1 });
        assert_eq!(snap.balance, 99.5);
    }

    #[tokio::test]
    async fn loss_debits_the_stake() {
        let ledger = PerformanceLedger::with_strategies(100.0, vec![StrategyId::from("a")]);
        let id = StrategyId::from("a");
        assert_eq!(ledger.record_loss(&id, 2.0).await, 98.0);
        assert_eq!(ledger.stats().await[&id], StrategyStats { wins: 0, losses: 1 });
    }

    #[tokio::test]
    async fn tie_changes_nothing() {
        let ledger = PerformanceLedger::new(50.0);
        let id = StrategyId::from("engulfing");
        assert_eq!(ledger.record(&id, 0.0).await, (Outcome::Tie, 50.0));
        assert!(ledger.stats().await.get(&id).is_none());
    }

    #[tokio::test]
    async fn adjust_balance_leaves_stats_alone() {
        let ledger = PerformanceLedger::with_strategies(10.0, vec![StrategyId::from("a")]);
        assert_eq!(ledger.adjust_balance(-2.0).await, 8.0);
        assert_eq!(ledger.stats().await[&StrategyId::from("a")], StrategyStats::default());
    }

    #[tokio::test]
    async fn apply_counts_without_moving_money() {
        let ledger = PerformanceLedger::new(10.0);
        let id = StrategyId::from("a");
        assert_eq!(ledger.apply(&id, Outcome::Loss, 0.0).await, 10.0);
        assert_eq!(ledger.stats().await[&id], StrategyStats { wins: 0, losses: 1 });
    }

    #[tokio::test]
    async fn concurrent_settlements_are_not_lost() {
        let ledger = PerformanceLedger::new(0.0);
        let mut tasks = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                let id = StrategyId::from("s");
                let profit = if i % 2 == 0 { 1.0 } else { -1.0 };
                ledger.record(&id, profit).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let snap = ledger.snapshot().await;
        assert_eq!(snap.stats[&StrategyId::from("s")], StrategyStats { wins: 25, losses: 25 });
        assert_eq!(snap.balance, 0.0);
    }
}

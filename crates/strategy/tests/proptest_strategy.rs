use std::collections::HashMap;

use proptest::prelude::*;

use common::{Action, Signal, StrategyId, StrategyStats};
use strategy::indicators::RsiIndicator;
use strategy::{Arbitrator, Verdict, DEFAULT_PERFORMANCE_WEIGHT};

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::Call), Just(Action::Put), Just(Action::Wait)]
}

proptest! {
    /// RSI stays inside [0, 100] for any price path.
    #[test]
    fn rsi_is_bounded(closes in prop::collection::vec(0.5f64..2.0f64, 0..120)) {
        for value in RsiIndicator::new(14).series(&closes) {
            prop_assert!((0.0..=100.0).contains(&value), "rsi out of range: {value}");
        }
    }

    /// A strictly rising series reads fully overbought.
    #[test]
    fn rising_prices_read_100(start in 0.5f64..2.0f64, step in 0.0001f64..0.01f64, n in 16usize..80) {
        let closes: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
        let rsi = RsiIndicator::new(14).compute(&closes);
        prop_assert!((rsi - 100.0).abs() < 1e-9);
    }

    /// A strictly falling series reads fully oversold.
    #[test]
    fn falling_prices_read_0(start in 50.0f64..100.0f64, step in 0.0001f64..0.01f64, n in 16usize..80) {
        let closes: Vec<f64> = (0..n).map(|i| start - i as f64 * step).collect();
        let rsi = RsiIndicator::new(14).compute(&closes);
        prop_assert!(rsi.abs() < 1e-9);
    }

    /// The winner has the highest adjusted score, and is the earliest
    /// candidate holding that score.
    #[test]
    fn arbitration_picks_first_maximum(
        raw in prop::collection::vec((action(), 0u8..=100u8, 0u64..10, 0u64..10), 1..8),
    ) {
        let mut stats = HashMap::new();
        let candidates: Vec<Signal> = raw
            .iter()
            .enumerate()
            .map(|(i, &(a, conf, wins, losses))| {
                let id = StrategyId::new(format!("s{i}"));
                stats.insert(id.clone(), StrategyStats { wins, losses });
                Signal::new("EURUSD", a, id, f64::from(conf)).unwrap()
            })
            .collect();

        let arbitrator = Arbitrator::new(65.0, DEFAULT_PERFORMANCE_WEIGHT);
        let decision = arbitrator.select(&candidates, &stats).unwrap();

        let scores: Vec<f64> = candidates
            .iter()
            .map(|s| s.confidence + arbitrator.bonus(&s.strategy, &stats))
            .collect();
        let best = scores.iter().cloned().fold(f64::MIN, f64::max);
        let first = scores.iter().position(|&s| s == best).unwrap();

        prop_assert_eq!(decision.adjusted_confidence, best);
        prop_assert_eq!(&decision.signal.strategy, &candidates[first].strategy);

        // Same inputs, same verdict.
        prop_assert_eq!(
            arbitrator.arbitrate(&candidates, &stats),
            arbitrator.arbitrate(&candidates, &stats)
        );
    }

    /// Actionable verdicts never carry WAIT and always clear the threshold.
    #[test]
    fn actionable_verdicts_clear_threshold(
        raw in prop::collection::vec((action(), 0u8..=100u8), 1..8),
        min_confidence in 0.0f64..100.0,
    ) {
        let candidates: Vec<Signal> = raw
            .iter()
            .enumerate()
            .map(|(i, &(a, conf))| {
                Signal::new("GBPUSD", a, StrategyId::new(format!("s{i}")), f64::from(conf)).unwrap()
            })
            .collect();
        let arbitrator = Arbitrator::new(min_confidence, DEFAULT_PERFORMANCE_WEIGHT);
        if let Verdict::Actionable(d) = arbitrator.arbitrate(&candidates, &HashMap::new()) {
            prop_assert!(d.signal.action != Action::Wait);
            prop_assert!(d.adjusted_confidence >= min_confidence);
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use common::{Broker, Error};

/// A time reading. `fallback` is set when the broker clock failed and
/// local UTC was used instead.
#[derive(Debug)]
pub struct Reading {
    pub time: DateTime<Utc>,
    pub fallback: Option<Error>,
}

/// Candle-boundary arithmetic on top of the broker's server time.
///
/// The boundary of a candle is `offset_secs` before its close. The window
/// from the boundary to the close belongs to that candle's cycle.
pub struct MarketClock {
    broker: Arc<dyn Broker>,
    period_ms: i64,
    offset_ms: i64,
}

impl MarketClock {
    pub fn new(broker: Arc<dyn Broker>, period_secs: u32, offset_secs: u32) -> Self {
        Self {
            broker,
            period_ms: i64::from(period_secs.max(1)) * 1000,
            offset_ms: i64::from(offset_secs.min(period_secs)) * 1000,
        }
    }

    /// Broker server time, or local UTC if the broker cannot tell.
    pub async fn now(&self) -> Reading {
        match self.broker.server_time().await {
            Ok(time) => Reading { time, fallback: None },
            Err(e) => Reading {
                time: Utc::now(),
                fallback: Some(match e {
                    Error::ClockUnavailable(_) => e,
                    other => Error::ClockUnavailable(other.to_string()),
                }),
            },
        }
    }

    /// Index of the candle containing `t`.
    pub fn cycle_index(&self, t: DateTime<Utc>) -> i64 {
        t.timestamp_millis().div_euclid(self.period_ms)
    }

    fn window_start_ms(&self) -> i64 {
        (self.period_ms - self.offset_ms) % self.period_ms
    }

    pub fn in_boundary_window(&self, t: DateTime<Utc>) -> bool {
        t.timestamp_millis().rem_euclid(self.period_ms) >= self.window_start_ms()
    }

    /// Time left until the next boundary; zero inside the window.
    pub fn until_boundary(&self, t: DateTime<Utc>) -> Duration {
        let into = t.timestamp_millis().rem_euclid(self.period_ms);
        let start = self.window_start_ms();
        if into >= start {
            Duration::ZERO
        } else {
            Duration::from_millis((start - into) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedBroker;
    use chrono::TimeZone;

    fn at(secs: i64, millis: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
    }

    fn clock() -> MarketClock {
        MarketClock::new(Arc::new(ScriptedBroker::default()), 60, 2)
    }

    #[test]
    fn window_opens_two_seconds_before_close() {
        let c = clock();
        assert!(!c.in_boundary_window(at(120 + 57, 999)));
        assert!(c.in_boundary_window(at(120 + 58, 0)));
        assert!(c.in_boundary_window(at(120 + 59, 999)));
        assert!(!c.in_boundary_window(at(180, 0)));
    }

    #[test]
    fn window_belongs_to_the_closing_candle() {
        let c = clock();
        assert_eq!(c.cycle_index(at(178, 0)), 2);
        assert_eq!(c.cycle_index(at(179, 500)), 2);
        assert_eq!(c.cycle_index(at(238, 0)), 3);
    }

    #[test]
    fn until_boundary_counts_down() {
        let c = clock();
        assert_eq!(c.until_boundary(at(120, 0)), Duration::from_secs(58));
        assert_eq!(c.until_boundary(at(177, 500)), Duration::from_millis(500));
        assert_eq!(c.until_boundary(at(178, 0)), Duration::ZERO);
    }

    #[test]
    fn zero_offset_fires_at_candle_open() {
        let c = MarketClock::new(Arc::new(ScriptedBroker::default()), 60, 0);
        assert!(c.in_boundary_window(at(60, 0)));
        assert_eq!(c.until_boundary(at(61, 0)), Duration::ZERO);
    }

    #[tokio::test]
    async fn falls_back_to_local_time() {
        let broker = ScriptedBroker::default();
        broker.fail_clock();
        let c = MarketClock::new(Arc::new(broker), 60, 2);
        let reading = c.now().await;
        assert!(matches!(reading.fallback, Some(Error::ClockUnavailable(_))));
        assert!((Utc::now() - reading.time).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn uses_broker_time_when_available() {
        let broker = ScriptedBroker::default();
        broker.set_time(at(1_000, 0));
        let c = MarketClock::new(Arc::new(broker), 60, 2);
        let reading = c.now().await;
        assert!(reading.fallback.is_none());
        assert_eq!(reading.time, at(1_000, 0));
    }
}

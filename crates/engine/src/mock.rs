//! Scripted broker for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use common::{Action, Broker, Candle, Error, OrderId, OrderRequest, Result};

#[derive(Default)]
pub(crate) struct ScriptedBroker {
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    outcomes: Mutex<VecDeque<std::result::Result<f64, String>>>,
    rejections: Mutex<VecDeque<String>>,
    orders: Mutex<Vec<OrderRequest>>,
    time: Mutex<Option<DateTime<Utc>>>,
    clock_broken: Mutex<bool>,
    outcome_panics: AtomicBool,
    next_id: AtomicU64,
}

impl ScriptedBroker {
    pub fn set_candles(&self, asset: &str, candles: Vec<Candle>) {
        self.candles.lock().unwrap().insert(asset.to_string(), candles);
    }

    /// Queue the profit returned by the next `check_outcome`.
    pub fn push_outcome(&self, profit: f64) {
        self.outcomes.lock().unwrap().push_back(Ok(profit));
    }

    pub fn push_outcome_error(&self, error: &str) {
        self.outcomes.lock().unwrap().push_back(Err(error.to_string()));
    }

    /// Reject the next `place_order`.
    pub fn reject_next(&self, reason: &str) {
        self.rejections.lock().unwrap().push_back(reason.to_string());
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn set_time(&self, t: DateTime<Utc>) {
        *self.time.lock().unwrap() = Some(t);
    }

    pub fn fail_clock(&self) {
        *self.clock_broken.lock().unwrap() = true;
    }

    /// Make every `check_outcome` panic.
    pub fn panic_on_outcome(&self) {
        self.outcome_panics.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn candles(
        &self,
        asset: &str,
        _period_secs: u32,
        count: usize,
        _as_of: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let all = self
            .candles
            .lock()
            .unwrap()
            .get(asset)
            .cloned()
            .ok_or_else(|| Error::Network(format!("no candles for {asset}")))?;
        let skip = all.len().saturating_sub(count);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId> {
        if let Some(reason) = self.rejections.lock().unwrap().pop_front() {
            return Err(Error::OrderRejected { reason });
        }
        self.orders.lock().unwrap().push(request.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderId(format!("order-{n}")))
    }

    async fn check_outcome(&self, order_id: &OrderId) -> Result<f64> {
        if self.outcome_panics.load(Ordering::SeqCst) {
            panic!("scripted outcome panic for {order_id}");
        }
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(profit)) => Ok(profit),
            Some(Err(e)) => Err(Error::Network(e)),
            None => Err(Error::Network("outcome not scripted".into())),
        }
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        if *self.clock_broken.lock().unwrap() {
            return Err(Error::ClockUnavailable("scripted failure".into()));
        }
        Ok(self.time.lock().unwrap().unwrap_or_else(Utc::now))
    }
}

/// `flat` unchanged candles followed by `tail` (open, close) pairs.
pub(crate) fn candles(flat: usize, tail: &[(f64, f64)]) -> Vec<Candle> {
    let start = DateTime::<Utc>::UNIX_EPOCH;
    let mut out: Vec<Candle> = (0..flat)
        .map(|i| Candle {
            open_time: start + Duration::minutes(i as i64),
            open: 1.25,
            high: 1.25,
            low: 1.25,
            close: 1.25,
            volume: 1.0,
        })
        .collect();
    for (j, &(open, close)) in tail.iter().enumerate() {
        out.push(Candle {
            open_time: start + Duration::minutes((flat + j) as i64),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
        });
    }
    out
}

pub(crate) fn signal(asset: &str, action: Action, strategy: &str, confidence: f64) -> common::Signal {
    common::Signal::new(asset, action, strategy.into(), confidence).unwrap()
}

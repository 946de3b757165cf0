use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use common::{Action, Broker, Candle, Config, Error, OrderId, OrderRequest, Result};

/// Simulation parameters of the paper venue.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub initial_balance: f64,
    /// Fraction of the stake paid out on a win.
    pub payout: f64,
    /// Maximum relative price move per one-second tick.
    pub volatility: f64,
    pub seed: u64,
    /// Synthetic history generated before the broker was created.
    pub history: Duration,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            payout: 0.85,
            volatility: 0.00005,
            seed: 42,
            history: Duration::from_secs(6 * 3600),
        }
    }
}

impl PaperConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            initial_balance: cfg.initial_balance,
            payout: cfg.paper_payout,
            // room for one full candle request plus the forming candle
            history: Duration::from_secs(
                u64::from(cfg.candle_period_secs) * (cfg.candle_count as u64 + 1),
            ),
            ..Self::default()
        }
    }
}

enum PaperClock {
    System,
    Manual(RwLock<DateTime<Utc>>),
}

/// How long prices and settled orders stay around once they can no longer
/// be requested as candles.
const RETENTION: Duration = Duration::from_secs(3600);

/// Ticks are only dropped in batches of this many seconds.
const TRIM_BATCH: usize = 3600;

/// One price per second from the broker's origin onwards. Only the tail is
/// kept: `ticks[0]` is the price at second `base`.
struct Tape {
    rng: StdRng,
    ticks: Vec<f64>,
    base: usize,
    decimals: i32,
}

impl Tape {
    fn new(asset: &str, seed: u64) -> Self {
        let mut hasher = DefaultHasher::new();
        asset.hash(&mut hasher);
        let (base, decimals) = base_price(asset);
        Self {
            rng: StdRng::seed_from_u64(seed ^ hasher.finish()),
            ticks: vec![base],
            base: 0,
            decimals,
        }
    }

    /// `None` once the second has been trimmed away.
    fn price(&mut self, index: usize, volatility: f64) -> Option<f64> {
        let offset = index.checked_sub(self.base)?;
        let scale = 10f64.powi(self.decimals);
        while self.ticks.len() <= offset {
            let last = self.ticks[self.ticks.len() - 1];
            let step = self.rng.gen_range(-1.0..=1.0) * volatility;
            let next = ((last * (1.0 + step)) * scale).round() / scale;
            self.ticks.push(next.max(1.0 / scale));
        }
        Some(self.ticks[offset])
    }

    /// Forget every second before `keep_from`. The newest tick always stays
    /// so the walk can continue.
    fn trim(&mut self, keep_from: usize) {
        let stale = keep_from
            .saturating_sub(self.base)
            .min(self.ticks.len() - 1);
        if stale >= TRIM_BATCH {
            self.ticks.drain(..stale);
            self.base += stale;
        }
    }
}

fn retention() -> chrono::Duration {
    chrono::Duration::from_std(RETENTION).unwrap_or_else(|_| chrono::Duration::zero())
}

fn base_price(asset: &str) -> (f64, i32) {
    match asset {
        "EURUSD" => (1.0850, 5),
        "GBPUSD" => (1.2700, 5),
        "USDJPY" => (149.50, 3),
        "AUDUSD" => (0.6600, 5),
        "USDCAD" => (1.3600, 5),
        a if a.ends_with("JPY") => (100.0, 3),
        _ => (1.0000, 5),
    }
}

struct PaperOrder {
    request: OrderRequest,
    entry_price: f64,
    expires_at: DateTime<Utc>,
    profit: Option<f64>,
}

/// Simulated binary-options venue.
///
/// Prices follow a seeded random walk per asset, so candles and order
/// settlement agree with each other. A CALL wins when the expiry price is
/// above the entry price, a PUT when it is below; equal prices tie.
/// No real orders are ever sent anywhere.
pub struct PaperBroker {
    config: PaperConfig,
    origin: DateTime<Utc>,
    clock: PaperClock,
    connected: AtomicBool,
    tapes: Mutex<HashMap<String, Tape>>,
    orders: RwLock<HashMap<OrderId, PaperOrder>>,
    balance: RwLock<f64>,
}

impl PaperBroker {
    pub fn new(config: PaperConfig) -> Self {
        Self::build(config, PaperClock::System, Utc::now())
    }

    /// A broker whose clock only moves through [`PaperBroker::advance`].
    pub fn with_manual_clock(config: PaperConfig, start: DateTime<Utc>) -> Self {
        Self::build(config, PaperClock::Manual(RwLock::new(start)), start)
    }

    fn build(config: PaperConfig, clock: PaperClock, start: DateTime<Utc>) -> Self {
        let history = chrono::Duration::from_std(config.history)
            .unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            balance = config.initial_balance,
            payout = config.payout,
            seed = config.seed,
            "PaperBroker initialized"
        );
        Self {
            balance: RwLock::new(config.initial_balance),
            origin: start - history,
            config,
            clock,
            connected: AtomicBool::new(false),
            tapes: Mutex::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn advance(&self, by: Duration) {
        if let PaperClock::Manual(now) = &self.clock {
            let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
            *now.write().await += by;
        }
    }

    pub async fn balance(&self) -> f64 {
        *self.balance.read().await
    }

    async fn now(&self) -> DateTime<Utc> {
        match &self.clock {
            PaperClock::System => Utc::now(),
            PaperClock::Manual(now) => *now.read().await,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("paper session not connected".into()))
        }
    }

    /// First second of the tape anything can still ask for: the candle
    /// history plus the retention window.
    async fn keep_from(&self) -> usize {
        let horizon = chrono::Duration::from_std(self.config.history + RETENTION)
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.now().await - horizon - self.origin)
            .num_seconds()
            .max(0) as usize
    }

    pub(crate) async fn price_at(&self, asset: &str, t: DateTime<Utc>) -> Result<f64> {
        let index = (t - self.origin).num_seconds();
        if index < 0 {
            return Err(Error::Network(format!("no {asset} price before {}", self.origin)));
        }
        let keep_from = self.keep_from().await;
        let mut tapes = self.tapes.lock().await;
        let tape = tapes
            .entry(asset.to_string())
            .or_insert_with(|| Tape::new(asset, self.config.seed));
        let price = tape.price(index as usize, self.config.volatility);
        tape.trim(keep_from);
        price.ok_or_else(|| Error::Network(format!("{asset} price at {t} is no longer kept")))
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!("Paper session connected");
        Ok(())
    }

    async fn candles(
        &self,
        asset: &str,
        period_secs: u32,
        count: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.ensure_connected()?;
        let period = i64::from(period_secs.max(1));
        let origin = self.origin.timestamp();
        let as_of_s = as_of.timestamp();
        if as_of_s < origin || count == 0 {
            return Ok(Vec::new());
        }

        let current = as_of_s.div_euclid(period);
        let first = (current - count as i64 + 1).max(origin.div_euclid(period) + 1);

        let keep_from = self.keep_from().await;
        let mut tapes = self.tapes.lock().await;
        let tape = tapes
            .entry(asset.to_string())
            .or_insert_with(|| Tape::new(asset, self.config.seed));

        let mut out = Vec::with_capacity(count);
        for k in first..=current {
            let start = k * period;
            // the forming candle ends at `as_of`
            let end = ((k + 1) * period - 1).min(as_of_s);
            let ticks: Vec<f64> = (start..=end)
                .map(|s| tape.price((s - origin) as usize, self.config.volatility))
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    Error::Network(format!("{asset} prices before {as_of} are no longer kept"))
                })?;
            let open_time = DateTime::from_timestamp(start, 0)
                .ok_or_else(|| Error::Other(format!("timestamp {start} out of range")))?;
            out.push(Candle {
                open_time,
                open: ticks[0],
                high: ticks.iter().cloned().fold(f64::MIN, f64::max),
                low: ticks.iter().cloned().fold(f64::MAX, f64::min),
                close: ticks[ticks.len() - 1],
                volume: ticks.len() as f64,
            });
        }
        tape.trim(keep_from);
        debug!(asset = %asset, count = out.len(), "Paper candles served");
        Ok(out)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId> {
        self.ensure_connected()?;
        if !(request.stake.is_finite() && request.stake > 0.0) {
            return Err(Error::OrderRejected {
                reason: format!("invalid stake {}", request.stake),
            });
        }
        if request.action == Action::Wait || request.duration_minutes == 0 {
            return Err(Error::OrderRejected {
                reason: "order needs a direction and a duration".into(),
            });
        }

        let now = self.now().await;
        let entry_price = self.price_at(&request.asset, now).await?;
        {
            let mut balance = self.balance.write().await;
            if request.stake > *balance {
                return Err(Error::OrderRejected {
                    reason: format!("insufficient balance {:.2}", *balance),
                });
            }
            *balance -= request.stake;
        }

        let id = OrderId(Uuid::new_v4().to_string());
        let expires_at = now + chrono::Duration::minutes(i64::from(request.duration_minutes));
        info!(
            order_id = %id,
            asset = %request.asset,
            action = %request.action,
            stake = request.stake,
            entry = entry_price,
            "Paper order placed"
        );
        let mut orders = self.orders.write().await;
        let before = orders.len();
        orders.retain(|_, o| o.profit.is_none() || now - o.expires_at < retention());
        if orders.len() < before {
            debug!(pruned = before - orders.len(), "Settled paper orders pruned");
        }
        orders.insert(
            id.clone(),
            PaperOrder {
                request: request.clone(),
                entry_price,
                expires_at,
                profit: None,
            },
        );
        Ok(id)
    }

    async fn check_outcome(&self, order_id: &OrderId) -> Result<f64> {
        let (request, entry_price, expires_at) = {
            let orders = self.orders.read().await;
            let order = orders
                .get(order_id)
                .ok_or_else(|| Error::Other(format!("unknown order {order_id}")))?;
            if let Some(profit) = order.profit {
                return Ok(profit);
            }
            (order.request.clone(), order.entry_price, order.expires_at)
        };

        if self.now().await < expires_at {
            return Err(Error::Network(format!("order {order_id} has not expired")));
        }
        let exit_price = self.price_at(&request.asset, expires_at).await?;

        let won = match request.action {
            Action::Call => exit_price > entry_price,
            Action::Put => exit_price < entry_price,
            Action::Wait => false,
        };
        let profit = if exit_price == entry_price {
            0.0
        } else if won {
            request.stake * self.config.payout
        } else {
            -request.stake
        };

        {
            let mut orders = self.orders.write().await;
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| Error::Other(format!("unknown order {order_id}")))?;
            // settled concurrently
            if let Some(settled) = order.profit {
                return Ok(settled);
            }
            order.profit = Some(profit);
        }
        *self.balance.write().await += request.stake + profit;

        debug!(
            order_id = %order_id,
            entry = entry_price,
            exit = exit_price,
            profit,
            "Paper order settled"
        );
        Ok(profit)
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.now().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 30).unwrap()
    }

    async fn broker() -> PaperBroker {
        let b = PaperBroker::with_manual_clock(PaperConfig::default(), start());
        b.connect().await.unwrap();
        b
    }

    fn call(stake: f64) -> OrderRequest {
        OrderRequest {
            asset: "EURUSD".into(),
            action: Action::Call,
            stake,
            duration_minutes: 1,
        }
    }

    #[tokio::test]
    async fn requires_a_session() {
        let b = PaperBroker::with_manual_clock(PaperConfig::default(), start());
        assert!(matches!(
            b.candles("EURUSD", 60, 10, start()).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn candles_are_ordered_and_consistent() {
        let b = broker().await;
        let candles = b.candles("EURUSD", 60, 100, start()).await.unwrap();
        assert_eq!(candles.len(), 100);
        for pair in candles.windows(2) {
            assert!(pair[0].open_time < pair[1].open_time);
        }
        for c in &candles {
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
        }
        // forming candle: 10:00:00 to 10:00:30 inclusive
        let last = candles.last().unwrap();
        assert_eq!(last.open_time, Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
        assert_eq!(last.volume, 31.0);
    }

    #[tokio::test]
    async fn same_seed_same_market() {
        let a = broker().await;
        let b = broker().await;
        let ca = a.candles("GBPUSD", 60, 20, start()).await.unwrap();
        let cb = b.candles("GBPUSD", 60, 20, start()).await.unwrap();
        assert_eq!(ca, cb);
    }

    #[tokio::test]
    async fn settles_against_expiry_price() {
        let b = broker().await;
        let id = b.place_order(&call(10.0)).await.unwrap();
        assert_eq!(b.balance().await, 9_990.0);

        // not expired yet
        assert!(matches!(b.check_outcome(&id).await, Err(Error::Network(_))));

        b.advance(Duration::from_secs(61)).await;
        let profit = b.check_outcome(&id).await.unwrap();

        let entry = b.price_at("EURUSD", start()).await.unwrap();
        let exit = b
            .price_at("EURUSD", start() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        let expected = if exit > entry {
            8.5
        } else if exit < entry {
            -10.0
        } else {
            0.0
        };
        assert_eq!(profit, expected);
        assert_eq!(b.balance().await, 10_000.0 + expected);

        // settled orders answer the same again
        assert_eq!(b.check_outcome(&id).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn rejects_unaffordable_and_empty_orders() {
        let b = broker().await;
        assert!(matches!(
            b.place_order(&call(50_000.0)).await,
            Err(Error::OrderRejected { .. })
        ));
        assert!(matches!(
            b.place_order(&call(0.0)).await,
            Err(Error::OrderRejected { .. })
        ));
        let wait = OrderRequest { action: Action::Wait, ..call(1.0) };
        assert!(matches!(b.place_order(&wait).await, Err(Error::OrderRejected { .. })));
    }

    #[tokio::test]
    async fn settled_orders_are_pruned_after_retention() {
        let b = broker().await;
        let settled = b.place_order(&call(10.0)).await.unwrap();
        let pending = b
            .place_order(&OrderRequest { duration_minutes: 600, ..call(10.0) })
            .await
            .unwrap();
        b.advance(Duration::from_secs(61)).await;
        b.check_outcome(&settled).await.unwrap();

        b.advance(RETENTION + Duration::from_secs(60)).await;
        b.place_order(&call(1.0)).await.unwrap();

        let orders = b.orders.read().await;
        assert_eq!(orders.len(), 2);
        assert!(!orders.contains_key(&settled));
        assert!(orders.contains_key(&pending));
    }

    #[tokio::test]
    async fn tape_keeps_only_the_recent_tail() {
        let b = broker().await;
        let config = PaperConfig::default();
        b.advance(config.history + RETENTION + Duration::from_secs(3 * 3600))
            .await;
        let now = b.server_time().await.unwrap();
        let candles = b.candles("EURUSD", 60, 100, now).await.unwrap();
        assert_eq!(candles.len(), 100);

        let kept = b.tapes.lock().await["EURUSD"].ticks.len();
        let bound = (config.history + RETENTION).as_secs() as usize + TRIM_BATCH + 1;
        assert!(kept <= bound, "{kept} ticks kept");
        assert!(matches!(b.price_at("EURUSD", start()).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn unknown_order_is_an_error() {
        let b = broker().await;
        assert!(b.check_outcome(&OrderId("nope".into())).await.is_err());
    }
}

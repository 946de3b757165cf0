use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use common::{
    Action, Broker, Error, MartingaleGate, OrderId, OrderRequest, Outcome, Result,
    SettlementRecord, Signal, Stage, StrategyId, TelemetryEvent, Trade, TradeState,
};
use risk::{AssetGuard, PerformanceLedger, RiskConfig};

use crate::recorder::SettlementSink;
use crate::telemetry::Telemetry;

const REQUEST_CAPACITY: usize = 64;

/// `check_outcome` attempts per trade before the outcome is given up on.
const OUTCOME_ATTEMPTS: u32 = 3;
const OUTCOME_BACKOFF: Duration = Duration::from_secs(2);

/// An arbitrated, actionable signal handed to the lifecycle manager.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub signal: Signal,
    pub adjusted_confidence: f64,
}

/// Cloneable handle for submitting open requests. When every desk is
/// dropped the manager drains open trades and exits.
#[derive(Clone, Debug)]
pub struct TradeDesk {
    request_tx: mpsc::Sender<OpenRequest>,
}

impl TradeDesk {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OpenRequest>) {
        let (request_tx, request_rx) = mpsc::channel(capacity);
        (Self { request_tx }, request_rx)
    }

    pub async fn open(&self, request: OpenRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| Error::Other("trade lifecycle manager stopped".into()))
    }
}

/// Reported by a watcher once it has an answer (or gave up).
struct Settlement {
    trade: Trade,
    result: Result<f64>,
}

/// Owns every trade from OPENING to CLOSED.
///
/// Open requests and watcher settlements arrive on two channels and are
/// handled one at a time, so ledger and guard mutations never interleave.
pub struct LifecycleManager {
    broker: Arc<dyn Broker>,
    ledger: PerformanceLedger,
    guard: AssetGuard,
    risk: RiskConfig,
    telemetry: Telemetry,
    recorder: Arc<dyn SettlementSink>,
    request_rx: mpsc::Receiver<OpenRequest>,
    settle_tx: mpsc::Sender<Settlement>,
    settle_rx: mpsc::Receiver<Settlement>,
    watchers: JoinSet<()>,
    /// Watcher task → the trade it watches, to recover from a panicked watcher.
    watching: HashMap<task::Id, OrderId>,
    open: HashMap<OrderId, Trade>,
    /// Escalated (stake, level) waiting for the next signal on an asset.
    carried: HashMap<String, (f64, u32)>,
    draining: bool,
}

impl LifecycleManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        ledger: PerformanceLedger,
        guard: AssetGuard,
        risk: RiskConfig,
        telemetry: Telemetry,
        recorder: Arc<dyn SettlementSink>,
    ) -> (Self, TradeDesk) {
        let (desk, request_rx) = TradeDesk::channel(REQUEST_CAPACITY);
        let (settle_tx, settle_rx) = mpsc::channel(REQUEST_CAPACITY);
        let manager = Self {
            broker,
            ledger,
            guard,
            risk,
            telemetry,
            recorder,
            request_rx,
            settle_tx,
            settle_rx,
            watchers: JoinSet::new(),
            watching: HashMap::new(),
            open: HashMap::new(),
            carried: HashMap::new(),
            draining: false,
        };
        (manager, desk)
    }

    /// Run until the request channel is closed and every open trade has
    /// settled. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            martingale = self.risk.martingale.enabled,
            gate = ?self.risk.martingale.gate,
            "Trade lifecycle manager running"
        );
        loop {
            tokio::select! {
                request = self.request_rx.recv(), if !self.draining => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        info!(open = self.open.len(), "No more open requests; draining");
                        self.draining = true;
                    }
                },
                Some(settlement) = self.settle_rx.recv() => {
                    self.handle_settlement(settlement).await;
                }
                Some(joined) = self.watchers.join_next_with_id() => match joined {
                    Ok((id, ())) => {
                        self.watching.remove(&id);
                    }
                    Err(e) => self.handle_watcher_failure(e).await,
                },
            }

            if self.draining && self.open.is_empty() {
                break;
            }
        }
        let balance = self.ledger.balance().await;
        info!(balance, "Trade lifecycle manager stopped");
    }

    /// A watcher died before reporting: the trade is dropped unbooked and
    /// its asset freed, as for an unresolved outcome.
    async fn handle_watcher_failure(&mut self, e: task::JoinError) {
        let trade = self
            .watching
            .remove(&e.id())
            .and_then(|order_id| self.open.remove(&order_id));
        let Some(trade) = trade else {
            error!(error = %e, "Settlement watcher failed");
            return;
        };
        error!(
            asset = %trade.asset,
            order_id = %trade.id,
            error = %e,
            "Settlement watcher failed; asset freed without booking"
        );
        self.telemetry.fault(
            Some(&trade.asset),
            Stage::Settlement,
            format!("watcher for {} failed: {e}", trade.id),
        );
        self.guard.release(&trade.asset).await;
    }

    async fn handle_request(&mut self, request: OpenRequest) {
        let signal = request.signal;
        if signal.action == Action::Wait {
            warn!(asset = %signal.asset, "WAIT signal sent for opening; ignored");
            return;
        }
        if let Err(why) = self.guard.try_acquire(&signal.asset).await {
            debug!(asset = %signal.asset, reason = %why, "Open request skipped");
            return;
        }

        let (stake, level) = match self.carried.remove(&signal.asset) {
            Some(carried) => carried,
            None => (self.risk.stake.base_stake(self.ledger.balance().await), 0),
        };
        info!(
            asset = %signal.asset,
            strategy = %signal.strategy,
            confidence = request.adjusted_confidence,
            "Signal accepted"
        );
        if self
            .open_trade(&signal.asset, signal.action, &signal.strategy, stake, level)
            .await
            .is_err()
        {
            self.guard.release(&signal.asset).await;
        }
    }

    /// OPENING → OPEN. The caller owns the asset reservation and frees it
    /// on error.
    async fn open_trade(
        &mut self,
        asset: &str,
        action: Action,
        strategy: &StrategyId,
        stake: f64,
        level: u32,
    ) -> Result<()> {
        info!(
            asset = %asset,
            action = %action,
            stake,
            level,
            state = %TradeState::Opening,
            "Placing order"
        );
        let request = OrderRequest {
            asset: asset.to_string(),
            action,
            stake,
            duration_minutes: self.risk.trade_duration_minutes,
        };
        let id = match self.broker.place_order(&request).await {
            Ok(id) => id,
            Err(e) => {
                warn!(asset = %asset, error = %e, "Order not placed");
                self.telemetry.fault(Some(asset), Stage::Order, &e);
                return Err(e);
            }
        };

        let trade = Trade {
            id,
            asset: asset.to_string(),
            action,
            strategy: strategy.clone(),
            stake,
            martingale_level: level,
            duration_minutes: self.risk.trade_duration_minutes,
            opened_at: Utc::now(),
            state: TradeState::Open,
        };
        info!(asset = %asset, order_id = %trade.id, "Trade open");
        self.telemetry.emit(TelemetryEvent::TradeOpened {
            trade: trade.clone(),
        });
        self.open.insert(trade.id.clone(), trade.clone());
        let order_id = trade.id.clone();
        let watcher = self.watchers.spawn(watch(
            self.broker.clone(),
            trade,
            self.risk.settlement_delay(),
            self.settle_tx.clone(),
        ));
        self.watching.insert(watcher.id(), order_id);
        Ok(())
    }

    async fn handle_settlement(&mut self, settlement: Settlement) {
        let Settlement { mut trade, result } = settlement;
        self.open.remove(&trade.id);

        let profit = match result.and_then(finite) {
            Ok(profit) => profit,
            Err(e) => {
                error!(
                    asset = %trade.asset,
                    order_id = %trade.id,
                    error = %e,
                    "Outcome unresolved; asset freed without booking"
                );
                self.telemetry.fault(Some(&trade.asset), Stage::Settlement, &e);
                self.guard.release(&trade.asset).await;
                return;
            }
        };

        let outcome = Outcome::from_profit(profit);
        trade.state = match outcome {
            Outcome::Win => TradeState::Won,
            Outcome::Loss => TradeState::Lost,
            Outcome::Tie => TradeState::Tied,
        };
        info!(
            asset = %trade.asset,
            order_id = %trade.id,
            state = %trade.state,
            profit,
            level = trade.martingale_level,
            "Trade settled"
        );

        match outcome {
            Outcome::Win => {
                let (_, balance) = self.ledger.record(&trade.strategy, profit).await;
                self.close(&trade, outcome, profit, balance).await;
                self.guard.release_with_cooldown(&trade.asset).await;
            }
            Outcome::Tie => {
                // A tied retry ends its sequence on the loss that started it.
                let balance = if trade.martingale_level > 0
                    && self.risk.martingale.gate == MartingaleGate::Bypass
                {
                    self.ledger.apply(&trade.strategy, Outcome::Loss, 0.0).await
                } else {
                    self.ledger.balance().await
                };
                self.close(&trade, outcome, profit, balance).await;
                self.guard.release(&trade.asset).await;
            }
            Outcome::Loss => self.handle_loss(trade).await,
        }
    }

    /// A loss always costs exactly the stake, whatever the broker reported.
    async fn handle_loss(&mut self, trade: Trade) {
        let loss = -trade.stake;
        let next = if self.draining {
            None
        } else {
            self.risk.martingale.next(trade.stake, trade.martingale_level)
        };

        match (next, self.risk.martingale.gate) {
            (Some((stake, level)), MartingaleGate::Bypass) => {
                let balance = self.ledger.adjust_balance(loss).await;
                self.close(&trade, Outcome::Loss, loss, balance).await;
                info!(asset = %trade.asset, stake, level, "Martingale retry");
                // the asset stays reserved across the retry
                if self
                    .open_trade(&trade.asset, trade.action, &trade.strategy, stake, level)
                    .await
                    .is_err()
                {
                    self.ledger.apply(&trade.strategy, Outcome::Loss, 0.0).await;
                    self.guard.release(&trade.asset).await;
                }
            }
            (Some((stake, level)), MartingaleGate::Carry) => {
                let balance = self.ledger.record_loss(&trade.strategy, trade.stake).await;
                self.close(&trade, Outcome::Loss, loss, balance).await;
                info!(asset = %trade.asset, stake, level, "Escalated stake carried to next signal");
                self.carried.insert(trade.asset.clone(), (stake, level));
                self.guard.release(&trade.asset).await;
            }
            (None, _) => {
                let balance = self.ledger.record_loss(&trade.strategy, trade.stake).await;
                self.close(&trade, Outcome::Loss, loss, balance).await;
                self.guard.release(&trade.asset).await;
            }
        }
    }

    /// Persist and publish the settlement row. The trade is CLOSED after this.
    async fn close(&self, trade: &Trade, outcome: Outcome, profit: f64, bankroll: f64) {
        let record = SettlementRecord {
            timestamp: Utc::now(),
            order_id: trade.id.clone(),
            asset: trade.asset.clone(),
            action: trade.action,
            strategy: trade.strategy.clone(),
            stake: trade.stake,
            martingale_level: trade.martingale_level,
            outcome,
            profit,
            bankroll,
        };
        if let Err(e) = self.recorder.record(&record).await {
            warn!(order_id = %trade.id, error = %e, "Settlement not persisted");
            self.telemetry.fault(Some(&trade.asset), Stage::Persist, &e);
        }
        self.telemetry.emit(TelemetryEvent::TradeSettled { record });
        debug!(order_id = %trade.id, state = %TradeState::Closed, "Trade closed");
    }
}

fn finite(profit: f64) -> Result<f64> {
    if profit.is_finite() {
        Ok(profit)
    } else {
        Err(Error::Other(format!("broker reported non-finite profit {profit}")))
    }
}

/// OPEN → SETTLING: wait out the trade, then ask for the outcome.
async fn watch(
    broker: Arc<dyn Broker>,
    mut trade: Trade,
    delay: Duration,
    settle_tx: mpsc::Sender<Settlement>,
) {
    tokio::time::sleep(delay).await;
    trade.state = TradeState::Settling;
    debug!(order_id = %trade.id, state = %trade.state, "Querying outcome");
    let result = query_outcome(broker.as_ref(), &trade.id).await;
    let _ = settle_tx.send(Settlement { trade, result }).await;
}

async fn query_outcome(broker: &dyn Broker, order_id: &OrderId) -> Result<f64> {
    let mut backoff = OUTCOME_BACKOFF;
    let mut attempt = 1;
    loop {
        match broker.check_outcome(order_id).await {
            Ok(profit) => return Ok(profit),
            Err(e) if attempt < OUTCOME_ATTEMPTS => {
                warn!(order_id = %order_id, attempt, error = %e, "Outcome query failed; retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

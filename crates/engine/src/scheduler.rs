use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use common::{
    Broker, CandleSeries, Config, EngineCommand, EngineState, Error, Result, Stage, StrategyId,
    StrategyStats, TelemetryEvent,
};
use risk::{AssetGuard, PerformanceLedger};
use strategy::{SignalPipeline, Verdict};

use crate::clock::MarketClock;
use crate::lifecycle::{OpenRequest, TradeDesk};
use crate::telemetry::Telemetry;

/// Cloneable handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl SchedulerHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub assets: Vec<String>,
    pub candle_period_secs: u32,
    pub candle_count: usize,
    pub boundary_offset_secs: u32,
    pub poll_interval: Duration,
    /// Quiet time after a dispatched cycle before boundaries are checked again.
    pub debounce: Duration,
}

impl From<&Config> for SchedulerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            assets: cfg.assets.clone(),
            candle_period_secs: cfg.candle_period_secs,
            candle_count: cfg.candle_count,
            boundary_offset_secs: cfg.boundary_offset_secs,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            debounce: Duration::from_secs(cfg.debounce_secs),
        }
    }
}

/// Shared by the per-asset analysis tasks of one cycle.
struct CycleContext {
    broker: Arc<dyn Broker>,
    pipeline: Arc<SignalPipeline>,
    telemetry: Telemetry,
    period_secs: u32,
    candle_count: usize,
}

/// Waits for each candle boundary, analyzes every eligible asset and hands
/// actionable decisions to the lifecycle manager.
pub struct Scheduler {
    settings: SchedulerSettings,
    clock: MarketClock,
    ctx: Arc<CycleContext>,
    ledger: PerformanceLedger,
    guard: AssetGuard,
    desk: TradeDesk,
    state: Arc<RwLock<EngineState>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    last_cycle: Option<i64>,
    clock_degraded: bool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SchedulerSettings,
        broker: Arc<dyn Broker>,
        pipeline: Arc<SignalPipeline>,
        ledger: PerformanceLedger,
        guard: AssetGuard,
        desk: TradeDesk,
        telemetry: Telemetry,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: state.clone(),
        };

        if settings.candle_count < pipeline.required_history() {
            warn!(
                candle_count = settings.candle_count,
                required = pipeline.required_history(),
                "Candle count below indicator history; every asset will be skipped"
            );
        }

        let scheduler = Scheduler {
            clock: MarketClock::new(
                broker.clone(),
                settings.candle_period_secs,
                settings.boundary_offset_secs,
            ),
            ctx: Arc::new(CycleContext {
                broker,
                pipeline,
                telemetry,
                period_secs: settings.candle_period_secs,
                candle_count: settings.candle_count,
            }),
            settings,
            ledger,
            guard,
            desk,
            state,
            command_rx,
            last_cycle: None,
            clock_degraded: false,
        };

        (scheduler, handle)
    }

    /// Run until Shutdown, a closed command channel, or a scheduler-level
    /// fault. Dropping the scheduler releases its `TradeDesk`, which starts
    /// the lifecycle manager's drain. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            assets = ?self.settings.assets,
            period_secs = self.settings.candle_period_secs,
            offset_secs = self.settings.boundary_offset_secs,
            "Scheduler running"
        );

        let mut wait = Duration::ZERO;
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(EngineCommand::Pause) => {
                        info!("Scheduler paused; no new trades");
                        *self.state.write().await = EngineState::Paused;
                    }
                    Some(EngineCommand::Resume) => {
                        info!("Scheduler resumed");
                        *self.state.write().await = EngineState::Running;
                    }
                    Some(EngineCommand::Shutdown) => {
                        info!("Shutdown requested");
                        break;
                    }
                    None => {
                        warn!("Scheduler command channel closed; shutting down");
                        break;
                    }
                },
                _ = tokio::time::sleep(wait) => {
                    match self.tick().await {
                        Ok(true) => wait = self.settings.debounce,
                        Ok(false) => wait = self.settings.poll_interval,
                        Err(e) => {
                            error!(error = %e, "Scheduler fault; stopping");
                            break;
                        }
                    }
                }
            }
        }

        *self.state.write().await = EngineState::Stopped;
        info!("Scheduler stopped");
    }

    /// One poll. Returns `true` when a cycle was analyzed.
    pub(crate) async fn tick(&mut self) -> Result<bool> {
        if *self.state.read().await != EngineState::Running {
            return Ok(false);
        }

        let reading = self.clock.now().await;
        match (&reading.fallback, self.clock_degraded) {
            (Some(e), false) => {
                warn!(error = %e, "Broker clock unavailable; using local time");
                self.ctx.telemetry.fault(None, Stage::Clock, e);
                self.clock_degraded = true;
            }
            (None, true) => {
                info!("Broker clock restored");
                self.clock_degraded = false;
            }
            _ => {}
        }

        let now = reading.time;
        if !self.clock.in_boundary_window(now) {
            return Ok(false);
        }
        let cycle = self.clock.cycle_index(now);
        if self.last_cycle == Some(cycle) {
            return Ok(false);
        }
        self.last_cycle = Some(cycle);

        self.run_cycle(now).await?;
        Ok(true)
    }

    /// Analyze every eligible asset concurrently and dispatch what is
    /// actionable. Fails only when the lifecycle manager is gone.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<usize> {
        let stats = Arc::new(self.ledger.stats().await);
        let mut tasks = JoinSet::new();

        for asset in &self.settings.assets {
            if let Err(why) = self.guard.eligibility(asset).await {
                debug!(asset = %asset, reason = %why, "Asset skipped");
                continue;
            }
            tasks.spawn(analyze_asset(
                self.ctx.clone(),
                asset.clone(),
                now,
                stats.clone(),
            ));
        }

        let mut dispatched = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(request)) => {
                    self.desk.open(request).await?;
                    dispatched += 1;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Asset analysis task failed"),
            }
        }
        debug!(dispatched, "Cycle complete");
        Ok(dispatched)
    }
}

/// Candles → indicators → analyzers → arbitration for one asset.
async fn analyze_asset(
    ctx: Arc<CycleContext>,
    asset: String,
    now: DateTime<Utc>,
    stats: Arc<HashMap<StrategyId, StrategyStats>>,
) -> Option<OpenRequest> {
    let candles = match ctx
        .broker
        .candles(&asset, ctx.period_secs, ctx.candle_count, now)
        .await
    {
        Ok(candles) => candles,
        Err(e) => {
            warn!(asset = %asset, error = %e, "Candle fetch failed");
            ctx.telemetry.fault(Some(&asset), Stage::Candles, &e);
            return None;
        }
    };
    let series = match CandleSeries::new(asset.clone(), candles) {
        Ok(series) => series,
        Err(e) => {
            warn!(asset = %asset, error = %e, "Malformed candle series");
            ctx.telemetry.fault(Some(&asset), Stage::Candles, &e);
            return None;
        }
    };

    let evaluation = match ctx.pipeline.evaluate(&series, &stats).await {
        Ok(evaluation) => evaluation,
        Err(e) => {
            let stage = match e {
                Error::InsufficientHistory { .. } => Stage::Indicators,
                _ => Stage::Analyzer,
            };
            warn!(asset = %asset, error = %e, "Asset not evaluated");
            ctx.telemetry.fault(Some(&asset), stage, &e);
            return None;
        }
    };

    for fault in &evaluation.faults {
        ctx.telemetry.fault(
            Some(&asset),
            fault.stage,
            format!("{}: {}", fault.strategy, fault.error),
        );
    }

    let decision = evaluation.verdict.decision()?;
    let actionable = matches!(evaluation.verdict, Verdict::Actionable(_));
    ctx.telemetry.emit(TelemetryEvent::SignalDecision {
        signal: decision.signal.clone(),
        adjusted_confidence: decision.adjusted_confidence,
        actionable,
        price: evaluation.snapshot.close,
    });

    if !actionable {
        debug!(
            asset = %asset,
            action = %decision.signal.action,
            confidence = decision.adjusted_confidence,
            "No trade this cycle"
        );
        return None;
    }
    Some(OpenRequest {
        signal: decision.signal.clone(),
        adjusted_confidence: decision.adjusted_confidence,
    })
}

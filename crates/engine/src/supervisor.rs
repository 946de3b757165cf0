use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use common::EngineCommand;

use crate::lifecycle::LifecycleManager;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::telemetry::TelemetryForwarder;

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The shutdown future resolved.
    Requested,
    /// The scheduler ended by itself (command channel closed or a
    /// scheduler-level fault).
    SchedulerStopped,
}

/// The spawned engine tasks, stopped in dependency order: scheduler first,
/// then the lifecycle manager (open trades settle), then the telemetry
/// forwarder (remaining events are flushed).
pub struct Supervisor {
    handle: SchedulerHandle,
    scheduler: JoinHandle<()>,
    manager: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Supervisor {
    pub fn spawn(
        scheduler: Scheduler,
        handle: SchedulerHandle,
        manager: LifecycleManager,
        forwarder: TelemetryForwarder,
    ) -> Self {
        Self {
            handle,
            forwarder: tokio::spawn(forwarder.run()),
            manager: tokio::spawn(manager.run()),
            scheduler: tokio::spawn(scheduler.run()),
        }
    }

    /// Run until `shutdown` resolves or the scheduler stops on its own,
    /// then drain every task.
    pub async fn run_until<F>(self, shutdown: F) -> Exit
    where
        F: Future<Output = ()>,
    {
        let Supervisor {
            handle,
            mut scheduler,
            manager,
            forwarder,
        } = self;

        let exit = tokio::select! {
            _ = shutdown => Exit::Requested,
            joined = &mut scheduler => {
                report("Scheduler", joined);
                Exit::SchedulerStopped
            }
        };

        match exit {
            Exit::Requested => {
                info!("Shutdown requested. Draining open trades.");
                handle.send(EngineCommand::Shutdown).await;
                report("Scheduler", scheduler.await);
            }
            Exit::SchedulerStopped => warn!("Scheduler stopped on its own. Draining open trades."),
        }

        report("Lifecycle", manager.await);
        // every Telemetry sender is gone once both tasks above have ended
        report("Telemetry", forwarder.await);
        exit
    }
}

fn report(task: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(task, error = %e, "Task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use common::{Result, SettlementRecord};
    use risk::{AssetGuard, PerformanceLedger, RiskConfig};
    use strategy::analyzers::MajorityOfThree;
    use strategy::{Arbitrator, Confluence, IndicatorParams, SignalPipeline, StrategyRegistry};

    use crate::lifecycle::TradeDesk;
    use crate::mock::{candles, ScriptedBroker};
    use crate::recorder::SettlementSink;
    use crate::scheduler::SchedulerSettings;
    use crate::telemetry::Telemetry;

    struct Discard;

    #[async_trait]
    impl SettlementSink for Discard {
        async fn record(&self, _: &SettlementRecord) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline() -> Arc<SignalPipeline> {
        let registry = StrategyRegistry::new(vec![Box::new(MajorityOfThree {
            id: "majority_of_three".into(),
            confidence: 70.0,
        })])
        .unwrap();
        Arc::new(SignalPipeline::new(
            IndicatorParams::default(),
            Confluence::default(),
            registry,
            Arbitrator::new(65.0, 20.0),
        ))
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            assets: vec!["EURUSD".into()],
            candle_period_secs: 60,
            candle_count: 100,
            boundary_offset_secs: 2,
            poll_interval: Duration::from_millis(250),
            debounce: Duration::from_secs(5),
        }
    }

    /// Engine wired like the binary. `desk` replaces the scheduler's trade
    /// desk; the returned sender keeps the forwarder alive until dropped.
    fn engine(broker: Arc<ScriptedBroker>, desk: Option<TradeDesk>) -> (Supervisor, Telemetry) {
        let ledger = PerformanceLedger::new(10_000.0);
        let guard = AssetGuard::new(Duration::from_secs(60));
        let (telemetry, rx) = Telemetry::channel(64);
        let forwarder = TelemetryForwarder::new(rx, None).unwrap();
        let (manager, manager_desk) = LifecycleManager::new(
            broker.clone(),
            ledger.clone(),
            guard.clone(),
            RiskConfig::default(),
            telemetry.clone(),
            Arc::new(Discard),
        );
        let (scheduler, handle) = Scheduler::new(
            settings(),
            broker,
            pipeline(),
            ledger,
            guard,
            desk.unwrap_or(manager_desk),
            telemetry.clone(),
        );
        (Supervisor::spawn(scheduler, handle, manager, forwarder), telemetry)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_fault_ends_the_run_without_a_shutdown_signal() {
        let broker = Arc::new(ScriptedBroker::default());
        broker.set_candles("EURUSD", candles(30, &[(1.2510, 1.25), (1.2510, 1.25), (1.25, 1.2510)]));
        broker.set_time(at(178));
        // nobody receives open requests: the first dispatch is a scheduler fault
        let (dead_desk, requests) = TradeDesk::channel(1);
        drop(requests);

        let (supervisor, telemetry) = engine(broker, Some(dead_desk));
        drop(telemetry);

        let exit = tokio::time::timeout(
            Duration::from_secs(3600),
            supervisor.run_until(std::future::pending()),
        )
        .await;
        assert_eq!(exit.unwrap(), Exit::SchedulerStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn requested_shutdown_waits_for_telemetry() {
        let broker = Arc::new(ScriptedBroker::default());
        // outside the boundary window: no cycle runs
        broker.set_time(at(100));
        let (supervisor, telemetry) = engine(broker, None);

        let run = tokio::spawn(supervisor.run_until(async {}));
        tokio::time::sleep(Duration::from_secs(5)).await;
        // scheduler and manager are done, but a sender is still alive
        assert!(!run.is_finished());

        drop(telemetry);
        assert_eq!(run.await.unwrap(), Exit::Requested);
    }
}

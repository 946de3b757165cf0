use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Broker, Config};
use engine::{
    HttpAdvisor, LifecycleManager, Scheduler, SchedulerSettings, SqliteRecorder, Supervisor,
    Telemetry, TelemetryForwarder, TELEMETRY_CAPACITY,
};
use paper::{PaperBroker, PaperConfig};
use risk::{AssetGuard, PerformanceLedger, RiskConfig};
use strategy::{Arbitrator, SignalPipeline, StrategyFileConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid configuration")?;
    info!(
        assets = ?cfg.assets,
        period_secs = cfg.candle_period_secs,
        "OptiBot starting (paper venue)"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .with_context(|| format!("failed to open {}", cfg.database_url))?;
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .context("database migration failed")?;
    info!("Database ready");

    // ── Signal pipeline ───────────────────────────────────────────────────────
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)
        .with_context(|| format!("failed to load {}", cfg.strategy_config_path))?;
    let pipeline = SignalPipeline::from_config(
        &strategy_file,
        Arbitrator::new(cfg.min_confidence, cfg.performance_weight),
    )?;
    let pipeline = match &cfg.advisory_url {
        Some(url) => {
            let timeout = Duration::from_secs(cfg.advisory_timeout_secs);
            info!(url = %url, "Advisory opinions enabled");
            pipeline.with_advisor(Arc::new(HttpAdvisor::new(url.clone(), timeout)?), timeout)
        }
        None => pipeline,
    };
    let ledger = PerformanceLedger::with_strategies(
        cfg.initial_balance,
        pipeline.registration_order(),
    );
    let pipeline = Arc::new(pipeline);

    // ── Broker ────────────────────────────────────────────────────────────────
    let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(PaperConfig::from_config(&cfg)));
    broker.connect().await.context("broker session failed")?;

    // ── Telemetry ─────────────────────────────────────────────────────────────
    let (telemetry, telemetry_rx) = Telemetry::channel(TELEMETRY_CAPACITY);
    let forwarder = TelemetryForwarder::new(telemetry_rx, cfg.telemetry_url.clone())?;

    // ── Trade lifecycle ───────────────────────────────────────────────────────
    let guard = AssetGuard::new(Duration::from_secs(cfg.cooldown_secs));
    let (manager, desk) = LifecycleManager::new(
        broker.clone(),
        ledger.clone(),
        guard.clone(),
        RiskConfig::from_config(&cfg),
        telemetry.clone(),
        Arc::new(SqliteRecorder::new(db.clone())),
    );

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let (scheduler, handle) = Scheduler::new(
        SchedulerSettings::from(&cfg),
        broker,
        pipeline,
        ledger.clone(),
        guard,
        desk,
        telemetry,
    );

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let supervisor = Supervisor::spawn(scheduler, handle, manager, forwarder);
    info!("All subsystems started. Waiting for shutdown signal.");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    let exit = supervisor.run_until(shutdown).await;

    let balance = ledger.balance().await;
    info!(?exit, balance, "OptiBot stopped");
    Ok(())
}

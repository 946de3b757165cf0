pub mod advisor;
pub mod clock;
pub mod lifecycle;
pub mod recorder;
pub mod scheduler;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod mock;

pub use advisor::HttpAdvisor;
pub use clock::MarketClock;
pub use lifecycle::{LifecycleManager, OpenRequest, TradeDesk};
pub use recorder::{SettlementSink, SqliteRecorder};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerSettings};
pub use supervisor::{Exit, Supervisor};
pub use telemetry::{Telemetry, TelemetryForwarder, TELEMETRY_CAPACITY};

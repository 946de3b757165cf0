pub mod guard;
pub mod ledger;
pub mod stake;

pub use guard::{AssetGuard, Ineligible};
pub use ledger::{LedgerSnapshot, PerformanceLedger};
pub use stake::{MartingalePolicy, RiskConfig, StakePolicy};

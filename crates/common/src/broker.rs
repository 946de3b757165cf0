use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Candle, OrderId, OrderRequest, Result};

/// Abstraction over the binary-options venue.
///
/// `PaperBroker` implements this for simulation. Only the scheduler (for
/// candles and time) and the trade lifecycle manager (for orders) hold a
/// `dyn Broker`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the session. A failure here is fatal for the process.
    async fn connect(&self) -> Result<()>;

    /// Up to `count` closed candles of `period_secs` for `asset`, oldest
    /// first, ending at or before `as_of`.
    async fn candles(
        &self,
        asset: &str,
        period_secs: u32,
        count: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Submit an order. A refusal is reported as `Error::OrderRejected`.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId>;

    /// Net profit of a settled order: positive win, negative loss, zero tie.
    async fn check_outcome(&self, order_id: &OrderId) -> Result<f64>;

    /// The venue's clock.
    async fn server_time(&self) -> Result<DateTime<Utc>>;
}

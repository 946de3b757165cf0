use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use common::{Result, SettlementRecord};

/// Destination of the append-only settlement log.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn record(&self, record: &SettlementRecord) -> Result<()>;
}

/// Writes one row per settlement into the `settlements` table.
pub struct SqliteRecorder {
    db: SqlitePool,
}

impl SqliteRecorder {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettlementSink for SqliteRecorder {
    async fn record(&self, record: &SettlementRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlements
                (timestamp, order_id, asset, action, strategy, stake,
                 martingale_level, outcome, profit, bankroll)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.order_id.0)
        .bind(&record.asset)
        .bind(record.action)
        .bind(record.strategy.as_str())
        .bind(record.stake)
        .bind(i64::from(record.martingale_level))
        .bind(record.outcome)
        .bind(record.profit)
        .bind(record.bankroll)
        .execute(&self.db)
        .await?;

        debug!(order_id = %record.order_id, "Settlement persisted");
        Ok(())
    }
}

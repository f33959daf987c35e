//! PostgreSQL implementation of the webhook idempotency guard.

use crate::pool::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use services::billing::{ProcessedEventRepository, TryBegin};

pub struct PostgresProcessedEventRepository {
    pool: DbPool,
}

impl PostgresProcessedEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventRepository for PostgresProcessedEventRepository {
    async fn try_begin(&self, event_id: &str, now: DateTime<Utc>) -> anyhow::Result<TryBegin> {
        let client = self.pool.get().await?;

        // Atomic insert-if-absent on the event id primary key. A conflict is
        // the AlreadyProcessed signal, not an error.
        let row = client
            .query_opt(
                "INSERT INTO processed_webhook_events (event_id, processed_at)
                 VALUES ($1, $2)
                 ON CONFLICT (event_id) DO NOTHING
                 RETURNING event_id",
                &[&event_id, &now],
            )
            .await?;

        if row.is_some() {
            tracing::debug!("Repository: Recorded new webhook event - event_id={}", event_id);
            Ok(TryBegin::FirstSeen)
        } else {
            tracing::debug!(
                "Repository: Webhook event already recorded - event_id={}",
                event_id
            );
            Ok(TryBegin::AlreadyProcessed)
        }
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let pruned = client
            .execute(
                "DELETE FROM processed_webhook_events WHERE processed_at < $1",
                &[&cutoff],
            )
            .await?;
        tracing::info!(
            "Repository: Pruned processed webhook events - cutoff={}, pruned={}",
            cutoff,
            pruned
        );
        Ok(pruned)
    }
}

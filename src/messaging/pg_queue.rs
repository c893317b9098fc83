//! PostgreSQL-backed [`WorkQueue`].
//!
//! Items live in `commander_work_items`. Consumers claim rows with
//! `FOR UPDATE SKIP LOCKED` and push `visible_at` forward by the visibility
//! timeout, so a crashed consumer's items reappear once it lapses.

use super::errors::{MessagingError, MessagingResult};
use super::queue::WorkQueue;
use super::work_item::{ReceivedWorkItem, WorkItem};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> MessagingResult<Self> {
        let queue_name = queue_name.into();
        if queue_name.trim().is_empty() {
            return Err(MessagingError::invalid_queue_name(queue_name, "must not be empty"));
        }
        Ok(Self { pool, queue_name })
    }

    pub async fn ensure_schema(&self) -> MessagingResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS commander_work_items (
                id BIGSERIAL PRIMARY KEY,
                queue_name TEXT NOT NULL,
                body JSONB NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                receive_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS commander_work_items_visible \
             ON commander_work_items (queue_name, visible_at, id)",
        )
        .execute(&self.pool)
        .await?;
        info!(queue = %self.queue_name, "✅ Work queue schema ready");
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn send(&self, item: &WorkItem, delay: Option<Duration>) -> MessagingResult<i64> {
        let delay_secs = delay.unwrap_or_default().as_secs_f64();
        let row = sqlx::query(
            "INSERT INTO commander_work_items (queue_name, body, visible_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) RETURNING id",
        )
        .bind(&self.queue_name)
        .bind(item.to_body()?)
        .bind(delay_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(&self.queue_name, "send", e.to_string()))?;
        let id: i64 = row.try_get("id")?;
        debug!(queue = %self.queue_name, id, kind = item.kind(), delay_secs, "📤 Work item enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedWorkItem>> {
        let rows = sqlx::query(
            r#"WITH claimed AS (
                SELECT id FROM commander_work_items
                WHERE queue_name = $1 AND visible_at <= now()
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE commander_work_items w
            SET visible_at = now() + make_interval(secs => $3),
                receive_count = w.receive_count + 1
            FROM claimed
            WHERE w.id = claimed.id
            RETURNING w.id, w.body, w.receive_count"#,
        )
        .bind(&self.queue_name)
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(&self.queue_name, "receive", e.to_string()))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let receive_count: i32 = row.try_get("receive_count")?;
            items.push(ReceivedWorkItem {
                receipt: row.try_get("id")?,
                receive_count: u32::try_from(receive_count).unwrap_or_default(),
                body: row.try_get::<Value, _>("body")?,
            });
        }
        items.sort_by_key(|item| item.receipt);
        Ok(items)
    }

    async fn delete(&self, receipt: i64) -> MessagingResult<()> {
        sqlx::query("DELETE FROM commander_work_items WHERE id = $1 AND queue_name = $2")
            .bind(receipt)
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(&self.queue_name, "delete", e.to_string())
            })?;
        Ok(())
    }
}

//! `notification_sends` table (spec.md §4.7, §6) — an append-only record
//! of each attempt the Notification Dispatcher makes to deliver a task's
//! result over one channel, promoted to a first-class table by
//! `SPEC_FULL.md` so delivery outcomes are queryable independent of
//! `task_executions.notification`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{Result, ToraleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSendStatus {
    Sent,
    Failed,
    Skipped,
}

impl NotificationSendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSendStatus::Sent => "sent",
            NotificationSendStatus::Failed => "failed",
            NotificationSendStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NotificationSend {
    pub id: Uuid,
    pub task_id: Uuid,
    pub execution_id: Uuid,
    pub channel_type: String,
    pub status: String,
    pub detail: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationSendRepository {
    pool: PgPool,
}

impl NotificationSendRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_sends (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL,
                execution_id UUID NOT NULL,
                channel_type TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                sent_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_notification_sends_execution ON notification_sends(execution_id);
            CREATE INDEX IF NOT EXISTS idx_notification_sends_task ON notification_sends(task_id, sent_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Record one channel's outcome. Unknown channel types still get a row
    /// (status = skipped, detail naming the unrecognized type) rather than
    /// being dropped silently — spec.md §4.7's unknown-type handling.
    pub async fn record(
        &self,
        id: Uuid,
        task_id: Uuid,
        execution_id: Uuid,
        channel_type: &str,
        status: NotificationSendStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_sends (id, task_id, execution_id, channel_type, status, detail) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(task_id)
        .bind(execution_id)
        .bind(channel_type)
        .bind(status.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn find_for_execution(&self, execution_id: Uuid) -> Result<Vec<NotificationSend>> {
        let rows = sqlx::query_as::<_, NotificationSend>(
            "SELECT id, task_id, execution_id, channel_type, status, detail, sent_at \
             FROM notification_sends WHERE execution_id = $1 ORDER BY sent_at ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_as_str_matches_column_values() {
        assert_eq!(NotificationSendStatus::Sent.as_str(), "sent");
        assert_eq!(NotificationSendStatus::Failed.as_str(), "failed");
        assert_eq!(NotificationSendStatus::Skipped.as_str(), "skipped");
    }
}

//! `webhook_deliveries` table (spec.md §3, §4.7, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{canonical_json, parse_jsonb_text, Result, ToraleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookDeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl WebhookDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDeliveryStatus::Pending => "pending",
            WebhookDeliveryStatus::Success => "success",
            WebhookDeliveryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct WebhookDeliveryRow {
    id: Uuid,
    task_id: Uuid,
    webhook_url: String,
    payload: String,
    webhook_secret: Option<String>,
    status: String,
    attempt_number: i32,
    next_retry_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    response_code: Option<i32>,
    response_body: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub task_id: Uuid,
    pub webhook_url: String,
    pub payload: Value,
    pub webhook_secret: Option<String>,
    pub status: WebhookDeliveryStatus,
    pub attempt_number: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

impl From<WebhookDeliveryRow> for WebhookDelivery {
    fn from(row: WebhookDeliveryRow) -> Self {
        let status = match row.status.as_str() {
            "success" => WebhookDeliveryStatus::Success,
            "failed" => WebhookDeliveryStatus::Failed,
            _ => WebhookDeliveryStatus::Pending,
        };
        WebhookDelivery {
            id: row.id,
            task_id: row.task_id,
            webhook_url: row.webhook_url,
            payload: parse_jsonb_text(Some(&row.payload), "payload", Value::Null),
            webhook_secret: row.webhook_secret,
            status,
            attempt_number: row.attempt_number,
            next_retry_at: row.next_retry_at,
            delivered_at: row.delivered_at,
            response_code: row.response_code,
            response_body: row.response_body,
            error_message: row.error_message,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDeliveryRepository {
    pool: PgPool,
}

impl WebhookDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL,
                webhook_url TEXT NOT NULL,
                payload JSONB NOT NULL,
                webhook_secret TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                attempt_number INTEGER NOT NULL DEFAULT 0,
                next_retry_at TIMESTAMPTZ,
                delivered_at TIMESTAMPTZ,
                response_code INTEGER,
                response_body TEXT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_retry
                ON webhook_deliveries(next_retry_at) WHERE delivered_at IS NULL;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn create(
        &self,
        id: Uuid,
        task_id: Uuid,
        webhook_url: &str,
        payload: &Value,
        webhook_secret: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_deliveries (id, task_id, webhook_url, payload, webhook_secret, status, attempt_number) \
             VALUES ($1, $2, $3, $4::jsonb, $5, 'pending', 0)",
        )
        .bind(id)
        .bind(task_id)
        .bind(webhook_url)
        .bind(canonical_json(payload))
        .bind(webhook_secret)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        let row = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"SELECT id, task_id, webhook_url, payload::text AS payload, webhook_secret,
               status, attempt_number, next_retry_at, delivered_at, response_code,
               response_body, error_message
               FROM webhook_deliveries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row.map(WebhookDelivery::from))
    }

    /// Rows the retry job (every `webhook_retry_interval`) should attempt:
    /// not yet delivered, and due.
    pub async fn find_due_for_retry(&self) -> Result<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDeliveryRow>(
            r#"SELECT id, task_id, webhook_url, payload::text AS payload, webhook_secret,
               status, attempt_number, next_retry_at, delivered_at, response_code,
               response_body, error_message
               FROM webhook_deliveries
               WHERE delivered_at IS NULL AND next_retry_at <= now()"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(WebhookDelivery::from).collect())
    }

    pub async fn mark_delivered(&self, id: Uuid, response_code: i32, response_body: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = 'success', delivered_at = now(), \
             response_code = $1, response_body = $2, next_retry_at = NULL WHERE id = $3",
        )
        .bind(response_code)
        .bind(truncate_body(response_body))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Advance to the next attempt: bump `attempt_number`, schedule
    /// `next_retry_at`, record the failure detail.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        attempt_number: i32,
        next_retry_at: DateTime<Utc>,
        response_code: Option<i32>,
        error_message: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries SET attempt_number = $1, next_retry_at = $2, \
             response_code = $3, error_message = $4 WHERE id = $5",
        )
        .bind(attempt_number)
        .bind(next_retry_at)
        .bind(response_code)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Permanent failure: exhausted `MAX_ATTEMPTS`, or a retry row missing
    /// its `webhook_secret`.
    pub async fn mark_permanently_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = 'failed', next_retry_at = NULL, \
             error_message = $1 WHERE id = $2",
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 4000;
    if body.len() > MAX {
        body.chars().take(MAX).collect()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_as_str_matches_column_values() {
        assert_eq!(WebhookDeliveryStatus::Pending.as_str(), "pending");
        assert_eq!(WebhookDeliveryStatus::Success.as_str(), "success");
        assert_eq!(WebhookDeliveryStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn truncate_body_caps_length() {
        let body = "x".repeat(5000);
        assert_eq!(truncate_body(&body).chars().count(), 4000);
    }
}

//! `task_executions` table (spec.md §3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{canonical_json, parse_jsonb_text, Result, ToraleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retrying,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Retrying => "retrying",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "retrying" => Some(ExecutionStatus::Retrying),
            _ => None,
        }
    }

    /// Non-terminal statuses participate in the dedupe guard (spec.md §4.6
    /// step 1) and the P2 no-concurrent-executions invariant.
    pub fn is_non_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Retrying
        )
    }
}

#[derive(Debug, Clone, FromRow)]
struct ExecutionRow {
    id: Uuid,
    task_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    error_category: Option<String>,
    internal_error: Option<String>,
    notification: Option<String>,
    result: Option<String>,
    grounding_sources: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_category: Option<String>,
    pub internal_error: Option<String>,
    pub notification: Option<String>,
    pub result: Value,
    pub grounding_sources: Value,
}

impl From<ExecutionRow> for TaskExecution {
    fn from(row: ExecutionRow) -> Self {
        TaskExecution {
            id: row.id,
            task_id: row.task_id,
            status: ExecutionStatus::from_str_opt(&row.status).unwrap_or(ExecutionStatus::Failed),
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count,
            error_category: row.error_category,
            internal_error: row.internal_error,
            notification: row.notification,
            result: parse_jsonb_text(row.result.as_deref(), "result", Value::Null),
            grounding_sources: parse_jsonb_text(
                row.grounding_sources.as_deref(),
                "grounding_sources",
                Value::Array(vec![]),
            ),
        }
    }
}

#[derive(Clone)]
pub struct TaskExecutionRepository {
    pool: PgPool,
}

impl TaskExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_executions (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                completed_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_category TEXT,
                internal_error TEXT,
                notification TEXT,
                result JSONB,
                grounding_sources JSONB
            );
            CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions(task_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_task_executions_status ON task_executions(status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// The dedupe guard's existence check (spec.md §4.6 step 1, P9): any
    /// execution for this task in a non-terminal status started within the
    /// dedupe window, or with a null `started_at`-adjacent state.
    pub async fn find_recent_non_terminal(
        &self,
        task_id: Uuid,
        dedupe_window_secs: i64,
    ) -> Result<Option<TaskExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"SELECT id, task_id, status, started_at, completed_at, retry_count,
               error_category, internal_error, notification,
               result::text AS result, grounding_sources::text AS grounding_sources
               FROM task_executions
               WHERE task_id = $1
                 AND status IN ('pending', 'running', 'retrying')
                 AND started_at > now() - make_interval(secs => $2)
               ORDER BY started_at DESC
               LIMIT 1"#,
        )
        .bind(task_id)
        .bind(dedupe_window_secs as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row.map(TaskExecution::from))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TaskExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"SELECT id, task_id, status, started_at, completed_at, retry_count,
               error_category, internal_error, notification,
               result::text AS result, grounding_sources::text AS grounding_sources
               FROM task_executions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row.map(TaskExecution::from))
    }

    /// Create a fresh PENDING row for a new (non-retry) fire.
    pub async fn create_pending(&self, id: Uuid, task_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_executions (id, task_id, status, started_at, retry_count) \
             VALUES ($1, $2, 'pending', now(), 0)",
        )
        .bind(id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Reuse a retry's row: PENDING → RUNNING, updating `started_at` to the
    /// current attempt's start time so history ordering (spec.md §5) stays
    /// correct.
    pub async fn mark_running(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE task_executions SET status = 'running', started_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Step 5 of the Execution Engine contract, run inside the caller's
    /// transaction so the `tasks` row update happens atomically alongside
    /// it (P4).
    pub async fn mark_success(
        &self,
        executor: &mut sqlx::PgConnection,
        id: Uuid,
        result: &Value,
        grounding_sources: &Value,
        notification: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE task_executions SET status = 'success', completed_at = now(), \
             result = $1::jsonb, grounding_sources = $2::jsonb, notification = $3 WHERE id = $4",
        )
        .bind(canonical_json(result))
        .bind(canonical_json(grounding_sources))
        .bind(notification)
        .bind(id)
        .execute(executor)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Step 8 failure path: classify, then either leave RETRYING (with
    /// incremented `retry_count`, reusing the row — P3) or FAILED
    /// terminally. `error_category` always reflects the *most recent*
    /// attempt (spec.md §9 open question resolution).
    pub async fn mark_failed_or_retrying(
        &self,
        id: Uuid,
        retrying: bool,
        retry_count: i32,
        error_category: &str,
        internal_error: &str,
        user_notification: Option<&str>,
    ) -> Result<()> {
        let status = if retrying { "retrying" } else { "failed" };
        let completed_at_clause = if retrying { "NULL" } else { "now()" };
        let query = format!(
            "UPDATE task_executions SET status = $1, retry_count = $2, error_category = $3, \
             internal_error = $4, notification = $5, completed_at = {completed_at_clause} WHERE id = $6"
        );
        sqlx::query(&query)
            .bind(status)
            .bind(retry_count)
            .bind(error_category)
            .bind(internal_error)
            .bind(user_notification)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// The reaper (spec.md §4.1, P10): force-fail anything stuck in
    /// `running` past the stale threshold.
    pub async fn reap_stale(&self, stale_threshold_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE task_executions SET status = 'failed', completed_at = now(), \
             internal_error = 'Reaped: execution stuck in running state' \
             WHERE status = 'running' AND started_at < now() - make_interval(secs => $1)",
        )
        .bind(stale_threshold_secs as f64)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Most recent N executions for a task, oldest-to-newest within the
    /// window, for the Execution History Store (spec.md §4.4).
    pub async fn recent_history(&self, task_id: Uuid, limit: u32) -> Result<Vec<TaskExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"SELECT id, task_id, status, started_at, completed_at, retry_count,
               error_category, internal_error, notification,
               result::text AS result, grounding_sources::text AS grounding_sources
               FROM task_executions
               WHERE task_id = $1 AND status = 'success'
               ORDER BY started_at DESC
               LIMIT $2"#,
        )
        .bind(task_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        let mut executions: Vec<TaskExecution> = rows.into_iter().map(TaskExecution::from).collect();
        executions.reverse(); // oldest-to-newest within the window
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_terminal_statuses_identified_correctly() {
        assert!(ExecutionStatus::Pending.is_non_terminal());
        assert!(ExecutionStatus::Running.is_non_terminal());
        assert!(ExecutionStatus::Retrying.is_non_terminal());
        assert!(!ExecutionStatus::Success.is_non_terminal());
        assert!(!ExecutionStatus::Failed.is_non_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Retrying,
        ] {
            assert_eq!(ExecutionStatus::from_str_opt(status.as_str()), Some(status));
        }
    }
}

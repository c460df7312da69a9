//! `scheduler_jobs` table (spec.md §4.1): the durable job store backing
//! the Scheduler Core. One row per task with an active fire scheduled;
//! absence of a row means the task has nothing pending.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{Result, ToraleError};

#[derive(Debug, Clone, FromRow)]
pub struct SchedulerJob {
    pub id: String,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub run_date: DateTime<Utc>,
    pub retry_count: i32,
    pub execution_id: Option<Uuid>,
    pub paused: bool,
}

fn job_id(task_id: Uuid) -> String {
    format!("task-{task_id}")
}

#[derive(Clone)]
pub struct SchedulerJobRepository {
    pool: PgPool,
}

impl SchedulerJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scheduler_jobs (
                id TEXT PRIMARY KEY,
                task_id UUID NOT NULL UNIQUE,
                user_id UUID NOT NULL,
                name TEXT NOT NULL,
                run_date TIMESTAMPTZ NOT NULL,
                retry_count INT NOT NULL DEFAULT 0,
                execution_id UUID,
                paused BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_due \
             ON scheduler_jobs (run_date) WHERE paused = FALSE",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;

        Ok(())
    }

    /// Upsert the job for `task_id`, replacing whatever was there and
    /// clearing `paused` — the fire is live again regardless of prior
    /// state (spec.md §4.1: "upsert a job; if one exists, replace").
    pub async fn add_or_resume(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        name: &str,
        run_date: DateTime<Utc>,
        retry_count: i32,
        execution_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO scheduler_jobs (id, task_id, user_id, name, run_date, retry_count, execution_id, paused, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, now())
               ON CONFLICT (task_id) DO UPDATE SET
                   name = EXCLUDED.name,
                   run_date = EXCLUDED.run_date,
                   retry_count = EXCLUDED.retry_count,
                   execution_id = EXCLUDED.execution_id,
                   paused = FALSE,
                   updated_at = now()"#,
        )
        .bind(job_id(task_id))
        .bind(task_id)
        .bind(user_id)
        .bind(name)
        .bind(run_date)
        .bind(retry_count)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Idempotent: pausing a task with no job row is not an error.
    pub async fn pause(&self, task_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scheduler_jobs SET paused = TRUE, updated_at = now() WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn resume(&self, task_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scheduler_jobs SET paused = FALSE, updated_at = now() WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Idempotent: removing a task with no job row is not an error.
    pub async fn remove(&self, task_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scheduler_jobs WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn find_by_task_id(&self, task_id: Uuid) -> Result<Option<SchedulerJob>> {
        let row = sqlx::query_as::<_, SchedulerJob>(
            "SELECT id, task_id, user_id, name, run_date, retry_count, execution_id, paused \
             FROM scheduler_jobs WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row)
    }

    /// Jobs due to fire: not paused, `run_date` in the past.
    pub async fn find_due(&self) -> Result<Vec<SchedulerJob>> {
        let rows = sqlx::query_as::<_, SchedulerJob>(
            "SELECT id, task_id, user_id, name, run_date, retry_count, execution_id, paused \
             FROM scheduler_jobs WHERE paused = FALSE AND run_date <= now()",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(rows)
    }

    /// Every `task_id` presently holding a job row, for orphan detection
    /// during `reconcile_on_startup`.
    pub async fn all_task_ids(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT task_id FROM scheduler_jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_task_prefixed() {
        let id = Uuid::nil();
        assert_eq!(job_id(id), format!("task-{id}"));
    }
}

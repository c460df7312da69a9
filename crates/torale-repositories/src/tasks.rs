//! `tasks` table (spec.md §3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{parse_jsonb_text, Result, ToraleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Active,
    Paused,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Active => "active",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TaskState::Active),
            "paused" => Some(TaskState::Paused),
            "completed" => Some(TaskState::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotifyBehavior {
    Once,
    Always,
}

/// A single entry in `Task.notifications`: `{type: email|webhook|slack, ...}`.
/// Stored as JSONB; the Notification Dispatcher (`torale-notify`) interprets
/// `config` per `channel_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(flatten)]
    pub config: Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub search_query: String,
    pub condition_description: String,
    pub schedule: String,
    pub state: String,
    pub state_changed_at: DateTime<Utc>,
    pub next_run: Option<DateTime<Utc>>,
    pub notify_behavior: String,
    pub notifications: String,
    pub last_known_state: Option<String>,
    pub last_execution_id: Option<Uuid>,
    pub is_public: bool,
    pub slug: Option<String>,
    pub view_count: i64,
    pub forked_from_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub search_query: String,
    pub condition_description: String,
    pub schedule: String,
    pub state: TaskState,
    pub state_changed_at: DateTime<Utc>,
    pub next_run: Option<DateTime<Utc>>,
    pub notify_behavior: NotifyBehavior,
    pub notifications: Vec<NotificationChannelConfig>,
    pub last_known_state: Value,
    pub last_execution_id: Option<Uuid>,
    pub is_public: bool,
    pub slug: Option<String>,
    pub view_count: i64,
    pub forked_from_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        let notifications: Vec<NotificationChannelConfig> =
            serde_json::from_str(&row.notifications).unwrap_or_default();
        let last_known_state =
            parse_jsonb_text(row.last_known_state.as_deref(), "last_known_state", Value::Null);
        Task {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            search_query: row.search_query,
            condition_description: row.condition_description,
            schedule: row.schedule,
            state: TaskState::from_str_opt(&row.state).unwrap_or(TaskState::Paused),
            state_changed_at: row.state_changed_at,
            next_run: row.next_run,
            notify_behavior: if row.notify_behavior == "once" {
                NotifyBehavior::Once
            } else {
                NotifyBehavior::Always
            },
            notifications,
            last_known_state,
            last_execution_id: row.last_execution_id,
            is_public: row.is_public,
            slug: row.slug,
            view_count: row.view_count,
            forked_from_task_id: row.forked_from_task_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                name TEXT NOT NULL,
                search_query TEXT NOT NULL,
                condition_description TEXT NOT NULL,
                schedule TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'active',
                state_changed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                next_run TIMESTAMPTZ,
                notify_behavior TEXT NOT NULL DEFAULT 'always',
                notifications JSONB NOT NULL DEFAULT '[]',
                last_known_state JSONB,
                last_execution_id UUID,
                is_public BOOLEAN NOT NULL DEFAULT false,
                slug TEXT,
                view_count BIGINT NOT NULL DEFAULT 0,
                forked_from_task_id UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (user_id, name)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_slug ON tasks(slug) WHERE slug IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"SELECT id, user_id, name, search_query, condition_description, schedule,
               state, state_changed_at, next_run, notify_behavior,
               notifications::text AS notifications, last_known_state::text AS last_known_state,
               last_execution_id, is_public, slug, view_count, forked_from_task_id,
               created_at, updated_at
               FROM tasks WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row.map(Task::from))
    }

    /// Tasks whose `state` is active or paused — the set that
    /// `reconcile_on_startup` (torale-scheduler) must have a job row for.
    pub async fn find_active_and_paused(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"SELECT id, user_id, name, search_query, condition_description, schedule,
               state, state_changed_at, next_run, notify_behavior,
               notifications::text AS notifications, last_known_state::text AS last_known_state,
               last_execution_id, is_public, slug, view_count, forked_from_task_id,
               created_at, updated_at
               FROM tasks WHERE state IN ('active', 'paused')"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    /// Conditional state UPDATE gated on the current state, per the Task
    /// State Machine's transition protocol (spec.md §4.2 step 2). Returns
    /// `true` iff a row was affected.
    pub async fn compare_and_set_state(
        &self,
        id: Uuid,
        from: TaskState,
        to: TaskState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET state = $1, state_changed_at = now(), updated_at = now() \
             WHERE id = $2 AND state = $3",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    /// Unconditional state write, used only for the compensating rollback
    /// in the State Machine — the forward path always uses
    /// `compare_and_set_state`.
    pub async fn force_set_state(&self, id: Uuid, state: TaskState) -> Result<()> {
        sqlx::query("UPDATE tasks SET state = $1, state_changed_at = now(), updated_at = now() WHERE id = $2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn set_next_run(&self, id: Uuid, next_run: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE tasks SET next_run = $1, updated_at = now() WHERE id = $2")
            .bind(next_run)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    /// Step 5 of the Execution Engine contract: update `last_known_state`
    /// and, if the response carried a topic and the name is still the
    /// default, rename the task. Intended to run inside the same
    /// transaction as the execution-row update (see `torale-engine`).
    pub async fn apply_successful_run(
        &self,
        executor: &mut sqlx::PgConnection,
        id: Uuid,
        last_known_state: &Value,
        last_execution_id: Uuid,
        new_name: Option<&str>,
    ) -> Result<()> {
        let canonical = torale_common::canonical_json(last_known_state);
        if let Some(name) = new_name {
            sqlx::query(
                "UPDATE tasks SET last_known_state = $1::jsonb, last_execution_id = $2, \
                 name = $3, updated_at = now() WHERE id = $4",
            )
            .bind(canonical)
            .bind(last_execution_id)
            .bind(name)
            .bind(id)
            .execute(executor)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        } else {
            sqlx::query(
                "UPDATE tasks SET last_known_state = $1::jsonb, last_execution_id = $2, \
                 updated_at = now() WHERE id = $3",
            )
            .bind(canonical)
            .bind(last_execution_id)
            .bind(id)
            .execute(executor)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn set_last_execution_id(&self, id: Uuid, execution_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tasks SET last_execution_id = $1, updated_at = now() WHERE id = $2")
            .bind(execution_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_round_trips_through_str() {
        for state in [TaskState::Active, TaskState::Paused, TaskState::Completed] {
            assert_eq!(TaskState::from_str_opt(state.as_str()), Some(state));
        }
    }

    #[test]
    fn unknown_state_string_has_no_mapping() {
        assert_eq!(TaskState::from_str_opt("bogus"), None);
    }
}

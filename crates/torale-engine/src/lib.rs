//! Execution Engine (spec.md §4.6): orchestrates one task run, triggered
//! either by the scheduler firing a due job or by a manual "execute now"
//! call. Grounded on `fc-scheduler::dispatcher::JobDispatcher`'s
//! load → act → persist → metrics shape and on
//! `fc-outbox::enhanced_processor`'s pattern of wrapping one item's
//! processing with an explicit classify-and-record failure branch that
//! never propagates past the component boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use torale_agent::client::{AgentClient, AgentError, AgentTransport};
use torale_classifier::{classify, ErrorCategory, ExceptionKind};
use torale_notify::NotificationDispatcher;
use torale_prompt::assembler::{assemble, PromptInput};
use torale_repositories::{NotifyBehavior, Task, TaskExecutionRepository, TaskRepository, TaskState};
use torale_scheduler::{JobExecutor, SchedulerCore, SchedulerCoreGateway};
use torale_state_machine::TaskStateMachine;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// spec.md §4.6 step 1: non-terminal executions started within this
    /// window block a new fire.
    pub dedupe_window_secs: i64,
    /// spec.md §4.4: how many recent successful executions feed the
    /// `<execution-history>` prompt section.
    pub history_window: u32,
    /// Fallback next-run when a `next_run` clamp or a resumed task has no
    /// better value (spec.md §4.1, §4.2).
    pub default_next_run_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { dedupe_window_secs: 30, history_window: 5, default_next_run_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Skipped { reason: String, existing_execution_id: Option<Uuid> },
    Success { execution_id: Uuid },
    Failed { execution_id: Uuid, retrying: bool },
}

pub struct ExecutionEngine<T: AgentTransport> {
    pool: PgPool,
    tasks: TaskRepository,
    executions: TaskExecutionRepository,
    agent: AgentClient<T>,
    notify: NotificationDispatcher,
    scheduler: Arc<SchedulerCore>,
    config: EngineConfig,
}

impl<T: AgentTransport> ExecutionEngine<T> {
    pub fn new(
        pool: PgPool,
        tasks: TaskRepository,
        executions: TaskExecutionRepository,
        agent: AgentClient<T>,
        notify: NotificationDispatcher,
        scheduler: Arc<SchedulerCore>,
        config: EngineConfig,
    ) -> Self {
        Self { pool, tasks, executions, agent, notify, scheduler, config }
    }

    /// Run one task job to completion, outside the scheduler's trait
    /// contract (used by `execute_now` and directly in tests).
    pub async fn run_job(&self, task_id: Uuid, retry_count: i32, execution_id: Option<Uuid>) -> EngineOutcome {
        self.run(task_id, retry_count, execution_id, None).await
    }

    /// Manual "execute now": always a fresh fire (never a retry), and may
    /// carry ad-hoc `user_context` for this one invocation.
    pub async fn execute_now(&self, task_id: Uuid, user_context: Option<&str>) -> EngineOutcome {
        self.run(task_id, 0, None, user_context).await
    }

    async fn run(
        &self,
        task_id: Uuid,
        retry_count: i32,
        execution_id: Option<Uuid>,
        user_context: Option<&str>,
    ) -> EngineOutcome {
        // Step 1: dedupe guard. Only applies to fresh fires — a retry
        // reusing an existing RETRYING row is, by definition, the
        // execution the dedupe window would otherwise find.
        if execution_id.is_none() {
            match self.executions.find_recent_non_terminal(task_id, self.config.dedupe_window_secs).await {
                Ok(Some(existing)) => {
                    return EngineOutcome::Skipped {
                        reason: "duplicate_execution".to_string(),
                        existing_execution_id: Some(existing.id),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "dedupe guard query failed, proceeding anyway");
                }
            }
        }

        // Step 2: execution row.
        let exec_id = match execution_id {
            Some(id) => {
                if let Err(e) = self.executions.mark_running(id).await {
                    error!(task_id = %task_id, execution_id = %id, error = %e, "failed to mark retry running");
                    return EngineOutcome::Failed { execution_id: id, retrying: false };
                }
                id
            }
            None => {
                let id = Uuid::new_v4();
                if let Err(e) = self.executions.create_pending(id, task_id).await {
                    error!(task_id = %task_id, error = %e, "failed to create execution row");
                    return EngineOutcome::Skipped { reason: "execution_row_create_failed".to_string(), existing_execution_id: None };
                }
                if let Err(e) = self.tasks.set_last_execution_id(task_id, id).await {
                    warn!(task_id = %task_id, execution_id = %id, error = %e, "failed to set last_execution_id");
                }
                if let Err(e) = self.executions.mark_running(id).await {
                    warn!(task_id = %task_id, execution_id = %id, error = %e, "failed to mark fresh execution running");
                }
                id
            }
        };

        // Step 3: load task.
        let task = match self.tasks.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                info!(task_id = %task_id, "task deleted mid-flight, skipping");
                return EngineOutcome::Skipped { reason: "task_deleted".to_string(), existing_execution_id: Some(exec_id) };
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to load task");
                return self.fail(&task_id, exec_id, retry_count, ExceptionKind::Database, &e.to_string()).await;
            }
        };

        // Step 4: assemble prompt, call agent.
        let history = self
            .executions
            .recent_history(task_id, self.config.history_window)
            .await
            .unwrap_or_else(|e| {
                warn!(task_id = %task_id, error = %e, "failed to load execution history, proceeding without it");
                Vec::new()
            });
        let prompt_input = PromptInput {
            search_query: &task.search_query,
            condition_description: &task.condition_description,
            user_context,
            history: &history,
        };
        let prompt = assemble(&prompt_input);

        let response = match self.agent.invoke(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                let (kind, message) = classify_agent_error(&e);
                return self.fail(&task.id, exec_id, retry_count, kind, &message).await;
            }
        };

        // Step 5: persist results atomically.
        let sources = wrap_sources(&response.sources);
        let result = json!({
            "evidence": response.evidence,
            "confidence": response.confidence,
            "next_run": response.next_run,
        });
        let last_known_state = json!({ "evidence": response.evidence });
        let new_name = response
            .topic
            .as_deref()
            .filter(|_| is_still_default_name(&task.name, &task.search_query));

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to open persistence transaction");
                return self.fail(&task.id, exec_id, retry_count, ExceptionKind::Database, &e.to_string()).await;
            }
        };
        if let Err(e) = self
            .executions
            .mark_success(&mut tx, exec_id, &result, &Value::Array(sources.clone()), response.notification.as_deref())
            .await
        {
            error!(task_id = %task.id, error = %e, "failed to persist execution success");
            return self.fail(&task.id, exec_id, retry_count, ExceptionKind::Database, &e.to_string()).await;
        }
        if let Err(e) = self
            .tasks
            .apply_successful_run(&mut tx, task.id, &last_known_state, exec_id, new_name)
            .await
        {
            error!(task_id = %task.id, error = %e, "failed to persist task's last_known_state");
            return self.fail(&task.id, exec_id, retry_count, ExceptionKind::Database, &e.to_string()).await;
        }
        if let Err(e) = tx.commit().await {
            error!(task_id = %task.id, error = %e, "failed to commit execution transaction");
            return self.fail(&task.id, exec_id, retry_count, ExceptionKind::Database, &e.to_string()).await;
        }

        // Step 6: notification dispatch.
        let mut notification_sent = false;
        if let Some(notification) = response.notification.as_deref() {
            notification_sent = true;
            if let Err(e) = self.notify.dispatch(&task, exec_id, notification, &response.evidence, &sources).await {
                warn!(task_id = %task.id, execution_id = %exec_id, error = %e, "notification dispatch failed");
            }
        }

        // Step 7: next-run decision.
        self.decide_next_run(&task, &response.next_run, notification_sent).await;

        EngineOutcome::Success { execution_id: exec_id }
    }

    async fn decide_next_run(&self, task: &Task, next_run: &Option<String>, notification_sent: bool) {
        let gateway = SchedulerCoreGateway::new(&self.scheduler, &self.tasks);
        let state_machine = TaskStateMachine::new(&self.tasks, &gateway);

        if task.notify_behavior == NotifyBehavior::Once && notification_sent {
            if let Err(e) = state_machine.transition(task, TaskState::Completed, None).await {
                error!(task_id = %task.id, error = %e, "failed to transition task to completed after once-notification");
            }
            return;
        }

        let Some(raw_next_run) = next_run else {
            if let Err(e) = state_machine.transition(task, TaskState::Completed, None).await {
                error!(task_id = %task.id, error = %e, "failed to transition task to completed after null next_run");
            }
            return;
        };

        let run_date = match DateTime::parse_from_rfc3339(raw_next_run) {
            Ok(parsed) => {
                let parsed = parsed.with_timezone(&Utc);
                if parsed <= Utc::now() {
                    Utc::now() + chrono::Duration::seconds(60)
                } else {
                    parsed
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, next_run = %raw_next_run, error = %e, "unparseable next_run, clamping to now+60s");
                Utc::now() + chrono::Duration::seconds(60)
            }
        };

        if let Err(e) = self.scheduler.add_or_resume(task.id, task.user_id, &task.name, run_date, 0, None).await {
            error!(task_id = %task.id, error = %e, "failed to install next-run scheduler job");
        }
        if let Err(e) = self.tasks.set_next_run(task.id, Some(run_date)).await {
            warn!(task_id = %task.id, error = %e, "failed to persist task.next_run");
        }
    }

    /// Step 8: classify, mark the execution FAILED or RETRYING, and
    /// reinstall a scheduler job only when retrying (same `execution_id`,
    /// `retry_count + 1`). A terminal failure touches no scheduler state —
    /// the task's own regular schedule (if still active) produces the
    /// next fresh attempt.
    async fn fail(
        &self,
        task_id: &Uuid,
        execution_id: Uuid,
        retry_count: i32,
        kind: ExceptionKind,
        internal_error: &str,
    ) -> EngineOutcome {
        let category = classify(kind, internal_error);
        let retrying = category.should_retry(retry_count as u32);
        let user_message = category.user_message();

        if let Err(e) = self
            .executions
            .mark_failed_or_retrying(
                execution_id,
                retrying,
                if retrying { retry_count + 1 } else { retry_count },
                category_str(category),
                internal_error,
                Some(user_message),
            )
            .await
        {
            error!(task_id = %task_id, execution_id = %execution_id, error = %e, "failed to persist execution failure");
        }

        if retrying {
            let delay = category.retry_delay_secs(retry_count as u32);
            let run_date = Utc::now() + chrono::Duration::seconds(delay as i64);
            if let Ok(Some(task)) = self.tasks.find_by_id(*task_id).await {
                if let Err(e) = self
                    .scheduler
                    .add_or_resume(task.id, task.user_id, &task.name, run_date, retry_count + 1, Some(execution_id))
                    .await
                {
                    error!(task_id = %task_id, error = %e, "failed to schedule retry");
                }
            }
        }

        EngineOutcome::Failed { execution_id, retrying }
    }
}

/// Bridges the scheduler's due-job poller to the engine. `user_id`/`name`
/// are the fire args the job store carried, but `run` reloads the task
/// itself rather than trusting them — they exist only to satisfy the
/// trait's contract.
#[async_trait]
impl<T: AgentTransport> JobExecutor for ExecutionEngine<T> {
    async fn execute_task_job(
        &self,
        task_id: Uuid,
        _user_id: Uuid,
        _name: &str,
        retry_count: i32,
        execution_id: Option<Uuid>,
    ) {
        let outcome = self.run(task_id, retry_count, execution_id, None).await;
        match outcome {
            EngineOutcome::Skipped { reason, .. } => {
                info!(task_id = %task_id, reason = %reason, "execution skipped");
            }
            EngineOutcome::Success { execution_id } => {
                info!(task_id = %task_id, execution_id = %execution_id, "execution succeeded");
            }
            EngineOutcome::Failed { execution_id, retrying } => {
                info!(task_id = %task_id, execution_id = %execution_id, retrying, "execution failed");
            }
        }
    }
}

fn classify_agent_error(error: &AgentError) -> (ExceptionKind, String) {
    match error {
        AgentError::Timeout(_) => (ExceptionKind::Timeout, error.to_string()),
        _ => (ExceptionKind::Generic, error.to_string()),
    }
}

/// Wraps the agent's bare source URLs into the `{url, title}` shape
/// `torale_prompt::history::render_record` expects when reading
/// `grounding_sources` back out.
fn wrap_sources(urls: &[String]) -> Vec<Value> {
    urls.iter().map(|url| json!({"url": url, "title": Value::Null})).collect()
}

/// A task is considered user-renamed the moment its name diverges from
/// the search query it was created with; only while they're still equal
/// does the engine propose the agent's `topic` as a new name.
fn is_still_default_name(task_name: &str, search_query: &str) -> bool {
    task_name == search_query
}

fn category_str(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::RateLimit => "RATE_LIMIT",
        ErrorCategory::Timeout => "TIMEOUT",
        ErrorCategory::Network => "NETWORK",
        ErrorCategory::AgentError => "AGENT_ERROR",
        ErrorCategory::UserError => "USER_ERROR",
        ErrorCategory::SystemError => "SYSTEM_ERROR",
        ErrorCategory::Unknown => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.dedupe_window_secs, 30);
        assert_eq!(config.history_window, 5);
        assert_eq!(config.default_next_run_hours, 24);
    }

    #[test]
    fn agent_timeout_classifies_as_timeout_kind() {
        let err = AgentError::Timeout(std::time::Duration::from_secs(120));
        let (kind, _) = classify_agent_error(&err);
        assert_eq!(kind, ExceptionKind::Timeout);
    }

    #[test]
    fn agent_invalid_response_message_contains_invalid_marker() {
        let err = AgentError::InvalidResponse("garbage".to_string());
        let (_, message) = classify_agent_error(&err);
        assert!(message.contains("invalid"));
    }

    #[test]
    fn category_str_round_trips_classifier_categories() {
        assert_eq!(category_str(ErrorCategory::RateLimit), "RATE_LIMIT");
        assert_eq!(category_str(ErrorCategory::UserError), "USER_ERROR");
    }

    #[test]
    fn wrap_sources_produces_url_title_objects() {
        let wrapped = wrap_sources(&["https://example.com".to_string()]);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0]["url"], json!("https://example.com"));
        assert!(wrapped[0]["title"].is_null());
    }

    #[test]
    fn wrap_sources_empty_input_yields_empty_vec() {
        let wrapped = wrap_sources(&[]);
        assert!(wrapped.is_empty());
    }

    #[test]
    fn is_still_default_name_true_when_equal() {
        assert!(is_still_default_name("weather in sf", "weather in sf"));
    }

    #[test]
    fn is_still_default_name_false_after_rename() {
        assert!(!is_still_default_name("SF Weather Watch", "weather in sf"));
    }
}

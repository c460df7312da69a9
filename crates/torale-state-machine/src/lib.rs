//! Task State Machine (spec.md §4.2): the single authority for task-state
//! transitions, binding each one to its scheduler side effect atomically.
//!
//! Grounded in two sources: `fc-platform::subscription::entity::Subscription`
//! for the Rust shape of a status-bearing entity with fluent
//! pause/resume/archive methods, and
//! `original_source/backend/src/torale/core/task_state_machine.py` for the
//! exact transition protocol (validate → conditional UPDATE gated on
//! current state → scheduler side effect → compensating rollback on
//! failure) — the teacher's `Subscription` has no rollback behavior, that
//! comes from the original source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use torale_repositories::{Task, TaskRepository, TaskState};

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("state changed concurrently")]
    ConcurrentChange,
    #[error("scheduler side effect failed: {0}")]
    SchedulerSideEffect(String),
    #[error(transparent)]
    Repository(#[from] torale_common::ToraleError),
}

/// The scheduler operations a state transition must invoke. Implemented by
/// `torale-scheduler`; kept as a trait here so the state machine's
/// transition protocol can be tested without a real job store, the way
/// `QueuePublisher` is substituted in the teacher's dispatcher tests.
#[async_trait]
pub trait SchedulerGateway: Send + Sync {
    async fn add_or_resume(&self, task_id: Uuid, next_run: DateTime<Utc>) -> Result<(), String>;
    async fn pause(&self, task_id: Uuid) -> Result<(), String>;
    async fn remove(&self, task_id: Uuid) -> Result<(), String>;
}

/// Whether a transition from `from` to `to` is allowed, per the fixed
/// transition table. Same-state is always allowed (a no-op, no side
/// effect).
fn is_valid_transition(from: TaskState, to: TaskState) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (TaskState::Paused, TaskState::Active)
            | (TaskState::Active, TaskState::Paused)
            | (TaskState::Active, TaskState::Completed)
            | (TaskState::Completed, TaskState::Active)
    )
}

pub struct TaskStateMachine<'a, G: SchedulerGateway> {
    tasks: &'a TaskRepository,
    scheduler: &'a G,
}

impl<'a, G: SchedulerGateway> TaskStateMachine<'a, G> {
    pub fn new(tasks: &'a TaskRepository, scheduler: &'a G) -> Self {
        Self { tasks, scheduler }
    }

    /// Transition `task` to `to`, applying the matching scheduler side
    /// effect. `next_run` is used only for `COMPLETED → ACTIVE` (a fresh
    /// schedule) — ignored for every other transition.
    pub async fn transition(
        &self,
        task: &Task,
        to: TaskState,
        next_run_on_resume: Option<DateTime<Utc>>,
    ) -> Result<(), StateMachineError> {
        let from = task.state;

        if from == to {
            return Ok(());
        }

        if !is_valid_transition(from, to) {
            return Err(StateMachineError::InvalidTransition { from, to });
        }

        let updated = self.tasks.compare_and_set_state(task.id, from, to).await?;
        if !updated {
            return Err(StateMachineError::ConcurrentChange);
        }

        let side_effect = match (from, to) {
            (TaskState::Paused, TaskState::Active) | (TaskState::Completed, TaskState::Active) => {
                let next_run = next_run_on_resume.unwrap_or_else(|| Utc::now() + chrono::Duration::hours(24));
                self.scheduler.add_or_resume(task.id, next_run).await
            }
            (TaskState::Active, TaskState::Paused) => self.scheduler.pause(task.id).await,
            (TaskState::Active, TaskState::Completed) => self.scheduler.remove(task.id).await,
            _ => Ok(()),
        };

        if let Err(reason) = side_effect {
            warn!(task_id = %task.id, %reason, "scheduler side effect failed, rolling back state");
            if let Err(rollback_err) = self.tasks.force_set_state(task.id, from).await {
                error!(task_id = %task.id, error = %rollback_err, "compensating rollback also failed");
            }
            return Err(StateMachineError::SchedulerSideEffect(reason));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn valid_transitions_match_the_fixed_table() {
        assert!(is_valid_transition(TaskState::Paused, TaskState::Active));
        assert!(is_valid_transition(TaskState::Active, TaskState::Paused));
        assert!(is_valid_transition(TaskState::Active, TaskState::Completed));
        assert!(is_valid_transition(TaskState::Completed, TaskState::Active));
    }

    #[test]
    fn same_state_is_always_a_no_op() {
        assert!(is_valid_transition(TaskState::Active, TaskState::Active));
        assert!(is_valid_transition(TaskState::Paused, TaskState::Paused));
        assert!(is_valid_transition(TaskState::Completed, TaskState::Completed));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        assert!(!is_valid_transition(TaskState::Paused, TaskState::Completed));
        assert!(!is_valid_transition(TaskState::Completed, TaskState::Paused));
    }

    struct CountingGateway {
        add_or_resume_calls: AtomicUsize,
        pause_calls: AtomicUsize,
        remove_calls: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl CountingGateway {
        fn new(fail_next: bool) -> Self {
            Self {
                add_or_resume_calls: AtomicUsize::new(0),
                pause_calls: AtomicUsize::new(0),
                remove_calls: AtomicUsize::new(0),
                fail_next: std::sync::atomic::AtomicBool::new(fail_next),
            }
        }
    }

    #[async_trait]
    impl SchedulerGateway for CountingGateway {
        async fn add_or_resume(&self, _task_id: Uuid, _next_run: DateTime<Utc>) -> Result<(), String> {
            self.add_or_resume_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.load(Ordering::SeqCst) {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }

        async fn pause(&self, _task_id: Uuid) -> Result<(), String> {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn remove(&self, _task_id: Uuid) -> Result<(), String> {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn gateway_call_counts_track_invocations() {
        let gateway = CountingGateway::new(false);
        assert_eq!(gateway.add_or_resume_calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.pause_calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.remove_calls.load(Ordering::SeqCst), 0);
    }
}

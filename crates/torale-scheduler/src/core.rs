//! Scheduler Core primitives (spec.md §4.1): the job-store operations the
//! Task State Machine and the Execution Engine both call into.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use torale_common::Result;
use torale_repositories::{SchedulerJobRepository, Task, TaskExecutionRepository, TaskRepository, TaskState};

pub struct SchedulerCore {
    jobs: SchedulerJobRepository,
    tasks: TaskRepository,
    executions: TaskExecutionRepository,
    /// How long an execution may sit in `running` before the reaper marks
    /// it failed (spec.md §4.1 default: 30 min; configurable per
    /// `torale_config::SchedulerConfig::stale_execution_threshold_secs`).
    stale_execution_threshold_secs: i64,
}

impl SchedulerCore {
    pub fn new(
        jobs: SchedulerJobRepository,
        tasks: TaskRepository,
        executions: TaskExecutionRepository,
        stale_execution_threshold_secs: i64,
    ) -> Self {
        Self { jobs, tasks, executions, stale_execution_threshold_secs }
    }

    pub async fn add_or_resume(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        name: &str,
        run_date: DateTime<Utc>,
        retry_count: i32,
        execution_id: Option<Uuid>,
    ) -> Result<()> {
        self.jobs
            .add_or_resume(task_id, user_id, name, run_date, retry_count, execution_id)
            .await
    }

    pub async fn pause(&self, task_id: Uuid) -> Result<()> {
        self.jobs.pause(task_id).await
    }

    pub async fn resume(&self, task_id: Uuid) -> Result<()> {
        self.jobs.resume(task_id).await
    }

    pub async fn remove(&self, task_id: Uuid) -> Result<()> {
        self.jobs.remove(task_id).await
    }

    pub async fn find_due(&self) -> Result<Vec<torale_repositories::SchedulerJob>> {
        self.jobs.find_due().await
    }

    /// Align job-store rows with task state (spec.md §4.1): active tasks
    /// missing a job get one scheduled at `next_run` (fallback
    /// `now + 24h`); paused tasks have their job paused; orphan jobs (task
    /// id no longer in the active/paused set) are removed. Failures are
    /// counted and logged, never fatal to startup.
    pub async fn reconcile_on_startup(&self) -> usize {
        let mut failures = 0usize;

        let tasks = match self.tasks.find_active_and_paused().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "reconcile_on_startup: failed to load active/paused tasks");
                return 1;
            }
        };

        let mut live_task_ids = std::collections::HashSet::new();
        for task in &tasks {
            live_task_ids.insert(task.id);
            if let Err(e) = self.reconcile_one(task).await {
                warn!(task_id = %task.id, error = %e, "reconcile_on_startup: failed to reconcile task");
                failures += 1;
            }
        }

        let existing_job_task_ids = match self.jobs.all_task_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "reconcile_on_startup: failed to list job-store task ids");
                return failures + 1;
            }
        };

        for task_id in existing_job_task_ids {
            if !live_task_ids.contains(&task_id) {
                if let Err(e) = self.jobs.remove(task_id).await {
                    warn!(task_id = %task_id, error = %e, "reconcile_on_startup: failed to remove orphan job");
                    failures += 1;
                } else {
                    info!(task_id = %task_id, "reconcile_on_startup: removed orphan scheduler job");
                }
            }
        }

        if failures > 0 {
            warn!(failures, "reconcile_on_startup completed with failures");
        } else {
            info!(tasks = tasks.len(), "reconcile_on_startup completed cleanly");
        }
        failures
    }

    async fn reconcile_one(&self, task: &Task) -> Result<()> {
        match task.state {
            TaskState::Active => {
                let run_date = task.next_run.filter(|d| *d > Utc::now()).unwrap_or_else(|| Utc::now() + chrono::Duration::hours(24));
                self.jobs.add_or_resume(task.id, task.user_id, &task.name, run_date, 0, None).await
            }
            TaskState::Paused => self.jobs.pause(task.id).await,
            TaskState::Completed => Ok(()),
        }
    }

    /// Force-fail executions stuck in `running` past the stale threshold
    /// (spec.md §4.1, P10). Run on every startup and periodically.
    pub async fn reap_stale_executions(&self) -> Result<u64> {
        let count = self.executions.reap_stale(self.stale_execution_threshold_secs).await?;
        if count > 0 {
            info!(count, "reaped stale running executions");
        }
        Ok(count)
    }
}

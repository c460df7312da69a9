//! Due-job poll loop, grounded in `fc-scheduler::poller::PendingJobPoller`'s
//! poll-find-dispatch shape — simplified since Torale has no message-group
//! blocking, only at-most-one-job-per-task.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::core::SchedulerCore;
use crate::SchedulerError;

/// The job-firing contract (spec.md §4.1): "the job store calls
/// `execute_task_job(task_id, user_id, name, retry_count=0,
/// execution_id=None)`". Implemented by `torale-engine`'s execution
/// engine; kept as a trait here so the poll loop can be exercised without
/// a real engine, the way `QueuePublisher` is substituted in the teacher's
/// dispatcher tests.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute_task_job(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        name: &str,
        retry_count: i32,
        execution_id: Option<Uuid>,
    );
}

#[derive(Clone)]
pub struct DueJobPoller {
    core: Arc<SchedulerCore>,
    executor: Arc<dyn JobExecutor>,
}

impl DueJobPoller {
    pub fn new(core: Arc<SchedulerCore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self { core, executor }
    }

    /// Pop every due job and fan its fire out onto a background task. Jobs
    /// are removed from the store up front rather than left until the
    /// engine finishes — this is what gives at-most-one-instance its
    /// teeth: a job cannot be found "due" twice while its engine run is
    /// still in flight. The engine re-adds a job (`add_or_resume`) for
    /// anything that isn't terminal.
    pub async fn poll(&self) -> Result<usize, SchedulerError> {
        let due = self.core.find_due().await.map_err(SchedulerError::Repository)?;
        if due.is_empty() {
            trace!("no due scheduler jobs");
            return Ok(0);
        }

        debug!(count = due.len(), "dispatching due scheduler jobs");
        metrics::gauge!("scheduler.due_jobs").set(due.len() as f64);

        let dispatched = due.len();
        for job in due {
            if let Err(e) = self.core.remove(job.task_id).await {
                error!(task_id = %job.task_id, error = %e, "failed to consume due job, skipping this tick");
                continue;
            }
            let executor = self.executor.clone();
            metrics::counter!("scheduler.jobs.dispatched_total").increment(1);
            tokio::spawn(async move {
                executor
                    .execute_task_job(job.task_id, job.user_id, &job.name, job.retry_count, job.execution_id)
                    .await;
            });
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute_task_job(
            &self,
            _task_id: Uuid,
            _user_id: Uuid,
            _name: &str,
            _retry_count: i32,
            _execution_id: Option<Uuid>,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn job_executor_trait_object_is_callable() {
        let executor: Arc<dyn JobExecutor> = Arc::new(CountingExecutor { calls: AtomicUsize::new(0) });
        executor.execute_task_job(Uuid::nil(), Uuid::nil(), "watch", 0, None).await;
        executor.execute_task_job(Uuid::nil(), Uuid::nil(), "watch", 1, Some(Uuid::nil())).await;
    }
}

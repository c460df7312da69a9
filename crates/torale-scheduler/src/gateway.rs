//! Adapts `SchedulerCore` to `torale_state_machine::SchedulerGateway`, the
//! seam the Task State Machine calls its scheduler side effects through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use torale_repositories::TaskRepository;
use torale_state_machine::SchedulerGateway;

use crate::core::SchedulerCore;

pub struct SchedulerCoreGateway<'a> {
    core: &'a SchedulerCore,
    tasks: &'a TaskRepository,
}

impl<'a> SchedulerCoreGateway<'a> {
    pub fn new(core: &'a SchedulerCore, tasks: &'a TaskRepository) -> Self {
        Self { core, tasks }
    }
}

#[async_trait]
impl<'a> SchedulerGateway for SchedulerCoreGateway<'a> {
    async fn add_or_resume(&self, task_id: Uuid, next_run: DateTime<Utc>) -> Result<(), String> {
        let task = self
            .tasks
            .find_by_id(task_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "task not found".to_string())?;
        self.core
            .add_or_resume(task_id, task.user_id, &task.name, next_run, 0, None)
            .await
            .map_err(|e| e.to_string())
    }

    async fn pause(&self, task_id: Uuid) -> Result<(), String> {
        self.core.pause(task_id).await.map_err(|e| e.to_string())
    }

    async fn remove(&self, task_id: Uuid) -> Result<(), String> {
        self.core.remove(task_id).await.map_err(|e| e.to_string())
    }
}

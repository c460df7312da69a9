//! Scheduler Core (spec.md §4.1): a durable, Postgres-backed job store
//! that schedules a single future fire per task and enforces
//! at-most-one-instance. Grounded on `fc-scheduler::lib::DispatchScheduler`'s
//! shape — two `tokio::spawn` poll loops gated by a shared
//! `Arc<RwLock<bool>> running` flag — with the job store itself rebuilt
//! against Postgres instead of MongoDB, since Torale co-locates the job
//! store with the application database (spec.md §3).

pub mod core;
pub mod gateway;
pub mod poller;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, warn};

pub use core::SchedulerCore;
pub use gateway::SchedulerCoreGateway;
pub use poller::{DueJobPoller, JobExecutor};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Repository(#[from] torale_common::ToraleError),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub stale_reap_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            stale_reap_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level orchestrator: owns the two poll loops and their shared
/// running flag, mirroring `fc-scheduler::DispatchScheduler::start`/`stop`.
pub struct DispatchScheduler {
    config: SchedulerConfig,
    core: Arc<SchedulerCore>,
    poller: DueJobPoller,
    running: Arc<RwLock<bool>>,
}

impl DispatchScheduler {
    pub fn new(config: SchedulerConfig, core: Arc<SchedulerCore>, executor: Arc<dyn JobExecutor>) -> Self {
        let poller = DueJobPoller::new(core.clone(), executor);
        Self { config, core, poller, running: Arc::new(RwLock::new(false)) }
    }

    /// Reconcile job-store rows against task state and reap any execution
    /// that's been stuck in `running` since before this process started.
    /// Run once, before `start`.
    pub async fn reconcile_on_startup(&self) {
        let failures = self.core.reconcile_on_startup().await;
        if failures > 0 {
            warn!(failures, "scheduler reconciliation finished with failures, continuing startup anyway");
        }
        if let Err(e) = self.core.reap_stale_executions().await {
            error!(error = %e, "initial stale-execution reap failed");
        }
    }

    pub async fn start(&self) {
        if !self.config.enabled {
            info!("scheduler is disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        info!(poll_interval_ms = self.config.poll_interval.as_millis(), "starting scheduler");

        let poller = self.poller.clone();
        let poll_interval = self.config.poll_interval;
        let running_clone = self.running.clone();
        tokio::spawn(async move {
            let mut tick = interval(poll_interval);
            loop {
                tick.tick().await;
                if !*running_clone.read().await {
                    break;
                }
                if let Err(e) = poller.poll().await {
                    error!(error = %e, "error polling for due scheduler jobs");
                }
            }
        });

        let core = self.core.clone();
        let reap_interval = self.config.stale_reap_interval;
        let running_clone2 = self.running.clone();
        tokio::spawn(async move {
            let mut tick = interval(reap_interval);
            loop {
                tick.tick().await;
                if !*running_clone2.read().await {
                    break;
                }
                if let Err(e) = core.reap_stale_executions().await {
                    error!(error = %e, "error reaping stale executions");
                }
            }
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_enabled_with_sane_intervals() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert!(config.poll_interval < config.stale_reap_interval);
    }
}

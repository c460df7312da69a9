//! Torale task execution runtime process entrypoint: loads config, connects
//! Postgres, brings up the Scheduler Core + Execution Engine + webhook retry
//! loop, and serves a minimal health endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use torale_agent::{AgentClient, AgentClientConfig, HttpAgentTransport};
use torale_config::ConfigLoader;
use torale_engine::{EngineConfig, ExecutionEngine};
use torale_notify::NotificationDispatcher;
use torale_repositories::{
    NotificationSendRepository, OAuthIntegrationRepository, SchedulerJobRepository, TaskExecutionRepository,
    TaskRepository, UserRepository, WebhookDeliveryRepository,
};
use torale_scheduler::{DispatchScheduler, JobExecutor, SchedulerConfig, SchedulerCore};
use torale_webhook::{WebhookDeliveryConfig, WebhookDeliveryService};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    scheduler_running: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    torale_common::logging::init_logging("torale-scheduler-server");
    info!("starting torale scheduler server");

    let config = ConfigLoader::new().load()?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    info!("connected to postgres");

    let tasks = TaskRepository::new(pool.clone());
    let executions = TaskExecutionRepository::new(pool.clone());
    let jobs = SchedulerJobRepository::new(pool.clone());
    let users = UserRepository::new(pool.clone());
    let integrations = OAuthIntegrationRepository::new(pool.clone(), config.oauth_encryption_key.clone());
    let sends = NotificationSendRepository::new(pool.clone());
    let webhook_deliveries = WebhookDeliveryRepository::new(pool.clone());

    tasks.init_schema().await?;
    executions.init_schema().await?;
    jobs.init_schema().await?;
    users.init_schema().await?;
    integrations.init_schema().await?;
    sends.init_schema().await?;
    webhook_deliveries.init_schema().await?;
    info!("schema initialization complete");

    let agent_transport = HttpAgentTransport::new(Duration::from_secs(config.agent.timeout_secs))?;
    let agent_client = AgentClient::new(
        agent_transport,
        AgentClientConfig {
            url_free: config.agent.url_free.clone(),
            url_paid: config.agent.url_paid.clone(),
        },
    );

    let webhook_service = WebhookDeliveryService::new(
        webhook_deliveries,
        WebhookDeliveryConfig {
            request_timeout: Duration::from_secs(config.webhook.request_timeout_secs),
        },
    )?;

    // No first-party email provider is wired up yet — email notifications
    // are recorded as skipped until one lands (spec.md §4.7, §1 non-goal on
    // outer delivery surfaces).
    let notify = NotificationDispatcher::new(sends, users, integrations, webhook_service.clone(), None);

    let scheduler_core = Arc::new(SchedulerCore::new(
        jobs,
        tasks.clone(),
        executions.clone(),
        config.scheduler.stale_execution_threshold_secs,
    ));

    let engine_config = EngineConfig {
        dedupe_window_secs: config.execution.dedupe_window_secs,
        history_window: config.execution.history_window,
        default_next_run_hours: config.execution.default_next_run_hours,
    };
    let engine = Arc::new(ExecutionEngine::new(
        pool.clone(),
        tasks,
        executions,
        agent_client,
        notify,
        scheduler_core.clone(),
        engine_config,
    ));
    let executor: Arc<dyn JobExecutor> = engine;

    let dispatch_config = SchedulerConfig {
        enabled: true,
        poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs),
        stale_reap_interval: Duration::from_secs(config.scheduler.stale_execution_threshold_secs.max(60) as u64),
    };
    let scheduler = Arc::new(DispatchScheduler::new(dispatch_config, scheduler_core, executor));
    scheduler.reconcile_on_startup().await;
    scheduler.start().await;

    let retry_interval = Duration::from_secs(config.webhook.retry_interval_secs);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(retry_interval);
        loop {
            tick.tick().await;
            if let Err(e) = webhook_service.process_due_retries().await {
                tracing::error!(error = %e, "webhook retry sweep failed");
            }
        }
    });

    let scheduler_clone = scheduler.clone();
    let app = Router::new()
        .route(
            "/health",
            get(move || {
                let scheduler = scheduler_clone.clone();
                async move {
                    let running = scheduler.is_running().await;
                    Json(HealthResponse {
                        status: if running { "UP".to_string() } else { "DOWN".to_string() },
                        scheduler_running: running,
                    })
                }
            }),
        )
        .route("/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!(?addr, "health server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    info!("scheduler server stopped");
    Ok(())
}

async fn shutdown_signal(scheduler: Arc<DispatchScheduler>) {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    info!("shutdown signal received");
    scheduler.stop().await;
}

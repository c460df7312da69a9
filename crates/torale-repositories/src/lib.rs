//! Typed Postgres accessors for Torale's domain tables. Grounded on
//! `fc-outbox::postgres::PostgresOutboxRepository`: a `PgPool`-backed
//! repository struct per table, `sqlx::query` with explicit columns,
//! defensive JSONB coercion on read via `torale_common::parse_jsonb_text`,
//! and an `init_schema()` that issues `CREATE TABLE IF NOT EXISTS` plus
//! indexes, so a fresh database can be brought up without a separate
//! migration tool (migrations proper are out of scope per spec.md §1).

pub mod executions;
pub mod integrations;
pub mod notifications;
pub mod scheduler_jobs;
pub mod tasks;
pub mod users;
pub mod webhooks;

pub use executions::{ExecutionStatus, TaskExecution, TaskExecutionRepository};
pub use integrations::{OAuthIntegration, OAuthIntegrationRepository};
pub use notifications::{NotificationSend, NotificationSendRepository, NotificationSendStatus};
pub use scheduler_jobs::{SchedulerJob, SchedulerJobRepository};
pub use tasks::{NotifyBehavior, Task, TaskRepository, TaskState};
pub use users::{User, UserRepository};
pub use webhooks::{WebhookDelivery, WebhookDeliveryRepository, WebhookDeliveryStatus};

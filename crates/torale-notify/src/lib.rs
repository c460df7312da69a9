//! Notification Dispatcher (spec.md §4.7): fans a task's result out over
//! its ordered `notifications` list, writing one `notification_sends` row
//! per channel. Grounded in `fc-router::notification::NotificationService`'s
//! shape — one trait per channel kind, composed rather than inherited —
//! adapted here from Teams-only to email/webhook/slack.

pub mod channels;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use channels::{dispatch_email, dispatch_slack, dispatch_webhook, EmailProvider, NotificationContext};
use torale_common::Result;
use torale_repositories::{
    NotificationSendRepository, NotificationSendStatus, OAuthIntegrationRepository, Task,
    UserRepository,
};
use torale_webhook::WebhookDeliveryService;

#[derive(Clone)]
pub struct NotificationDispatcher {
    sends: NotificationSendRepository,
    users: UserRepository,
    integrations: OAuthIntegrationRepository,
    webhook: WebhookDeliveryService,
    email_provider: Option<Arc<dyn EmailProvider>>,
    slack_client: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(
        sends: NotificationSendRepository,
        users: UserRepository,
        integrations: OAuthIntegrationRepository,
        webhook: WebhookDeliveryService,
        email_provider: Option<Arc<dyn EmailProvider>>,
    ) -> Self {
        Self {
            sends,
            users,
            integrations,
            webhook,
            email_provider,
            slack_client: reqwest::Client::new(),
        }
    }

    /// Dispatch `notification` to every channel configured on `task`,
    /// recording one `notification_sends` row per channel. Never returns
    /// an error for an individual channel's failure — those are recorded,
    /// not propagated, since one bad channel shouldn't block the others.
    pub async fn dispatch(
        &self,
        task: &Task,
        execution_id: Uuid,
        notification: &str,
        evidence: &str,
        sources: &[Value],
    ) -> Result<()> {
        let ctx = NotificationContext {
            task_id: task.id,
            task_name: &task.name,
            execution_id,
            notification,
            evidence,
            sources,
            timestamp: Utc::now(),
        };

        for channel in &task.notifications {
            let (status, detail) = match channel.channel_type.as_str() {
                "email" => self.dispatch_email(task, &ctx).await,
                "webhook" => self.dispatch_webhook(task, &ctx).await,
                "slack" => self.dispatch_slack(task, &ctx).await,
                other => {
                    warn!(task_id = %task.id, channel_type = %other, "unknown notification channel type, skipping");
                    (NotificationSendStatus::Skipped, Some(format!("unknown channel type: {other}")))
                }
            };

            self.sends
                .record(Uuid::new_v4(), task.id, execution_id, &channel.channel_type, status, detail.as_deref())
                .await?;
        }

        Ok(())
    }

    async fn dispatch_email(
        &self,
        task: &Task,
        ctx: &NotificationContext<'_>,
    ) -> (NotificationSendStatus, Option<String>) {
        let Some(provider) = self.email_provider.as_ref() else {
            return (NotificationSendStatus::Skipped, Some("no email provider configured".to_string()));
        };
        let recipient = match self.users.find_by_id(task.user_id).await {
            Ok(Some(user)) => user.email,
            Ok(None) => return (NotificationSendStatus::Failed, Some("task owner not found".to_string())),
            Err(e) => return (NotificationSendStatus::Failed, Some(e.to_string())),
        };
        match dispatch_email(provider.as_ref(), &recipient, ctx).await {
            Ok(()) => (NotificationSendStatus::Sent, None),
            Err(e) => (NotificationSendStatus::Failed, Some(e.to_string())),
        }
    }

    async fn dispatch_webhook(
        &self,
        task: &Task,
        ctx: &NotificationContext<'_>,
    ) -> (NotificationSendStatus, Option<String>) {
        let user = match self.users.find_by_id(task.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return (NotificationSendStatus::Failed, Some("task owner not found".to_string())),
            Err(e) => return (NotificationSendStatus::Failed, Some(e.to_string())),
        };
        if !user.default_webhook_enabled {
            return (NotificationSendStatus::Skipped, Some("webhook delivery disabled for user".to_string()));
        }
        let Some(url) = user.default_webhook_url.as_deref() else {
            return (NotificationSendStatus::Failed, Some("no webhook configured for this task's owner".to_string()));
        };
        match dispatch_webhook(&self.webhook, url, user.default_webhook_secret.as_deref(), ctx).await {
            Ok(()) => (NotificationSendStatus::Sent, None),
            Err(e) => (NotificationSendStatus::Failed, Some(e.to_string())),
        }
    }

    async fn dispatch_slack(
        &self,
        task: &Task,
        ctx: &NotificationContext<'_>,
    ) -> (NotificationSendStatus, Option<String>) {
        let integration = match self.integrations.find_by_user_and_provider(task.user_id, "slack").await {
            Ok(Some(integration)) => integration,
            Ok(None) => return (NotificationSendStatus::Skipped, Some("no slack integration for this user".to_string())),
            Err(e) => return (NotificationSendStatus::Failed, Some(e.to_string())),
        };
        // Slack is best-effort: failures are logged and recorded, never retried.
        match dispatch_slack(&self.slack_client, &integration, ctx).await {
            Ok(()) => (NotificationSendStatus::Sent, None),
            Err(e) => (NotificationSendStatus::Failed, Some(e.to_string())),
        }
    }
}

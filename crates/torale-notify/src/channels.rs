//! Individual channel sub-dispatchers (spec.md §4.7).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, warn};

use torale_repositories::OAuthIntegration;
use torale_webhook::WebhookDeliveryService;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("email provider error: {0}")]
    Email(String),
    #[error("webhook dispatch error: {0}")]
    Webhook(String),
    #[error("slack error: {0}")]
    Slack(String),
    #[error("no webhook configured for this task's owner")]
    NoWebhookConfigured,
    #[error("no slack integration for this user")]
    NoSlackIntegration,
}

pub struct NotificationContext<'a> {
    pub task_id: uuid::Uuid,
    pub task_name: &'a str,
    pub execution_id: uuid::Uuid,
    pub notification: &'a str,
    pub evidence: &'a str,
    pub sources: &'a [Value],
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// An external email delivery collaborator, out of scope per spec.md §1 —
/// the Dispatcher only supplies recipient/subject/body.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, to: &str, subject: &str, markdown_body: &str) -> Result<(), NotifyError>;
}

pub async fn dispatch_email(
    provider: &dyn EmailProvider,
    recipient_email: &str,
    ctx: &NotificationContext<'_>,
) -> Result<(), NotifyError> {
    let subject = format!("Torale: {}", ctx.task_name);
    provider.send(recipient_email, &subject, ctx.notification).await
}

/// `WebhookPayload` per spec.md §4.7.
fn build_webhook_payload(ctx: &NotificationContext<'_>) -> Value {
    json!({
        "task_id": ctx.task_id,
        "task_name": ctx.task_name,
        "execution_id": ctx.execution_id,
        "condition_met": true,
        "notification": ctx.notification,
        "evidence": ctx.evidence,
        "sources": ctx.sources,
        "timestamp": ctx.timestamp.to_rfc3339(),
    })
}

pub async fn dispatch_webhook(
    service: &WebhookDeliveryService,
    webhook_url: &str,
    webhook_secret: Option<&str>,
    ctx: &NotificationContext<'_>,
) -> Result<(), NotifyError> {
    let payload = build_webhook_payload(ctx);
    service
        .enqueue(ctx.task_id, webhook_url, &payload, webhook_secret)
        .await
        .map_err(|e| NotifyError::Webhook(e.to_string()))?;
    Ok(())
}

pub async fn dispatch_slack(
    client: &reqwest::Client,
    integration: &OAuthIntegration,
    ctx: &NotificationContext<'_>,
) -> Result<(), NotifyError> {
    let Some(channel_id) = integration.channel_id.as_deref() else {
        warn!(task_id = %ctx.task_id, "slack integration has no channel selected");
        return Err(NotifyError::Slack("no channel selected".into()));
    };

    let blocks = json!([
        {
            "type": "section",
            "text": { "type": "mrkdwn", "text": ctx.notification }
        }
    ]);
    let body = json!({ "channel": channel_id, "blocks": blocks });

    let response = client
        .post("https://slack.com/api/chat.postMessage")
        .bearer_auth(&integration.access_token)
        .json(&body)
        .send()
        .await
        .map_err(|e| NotifyError::Slack(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        error!(task_id = %ctx.task_id, %status, "slack API returned non-success status");
        return Err(NotifyError::Slack(format!("HTTP {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_ctx() -> NotificationContext<'static> {
        NotificationContext {
            task_id: Uuid::nil(),
            task_name: "Laptop price watch",
            execution_id: Uuid::nil(),
            notification: "Price dropped below $900",
            evidence: "checked retailer X",
            sources: &[],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn webhook_payload_has_condition_met_true() {
        let ctx = sample_ctx();
        let payload = build_webhook_payload(&ctx);
        assert_eq!(payload["condition_met"], true);
        assert_eq!(payload["notification"], "Price dropped below $900");
    }
}

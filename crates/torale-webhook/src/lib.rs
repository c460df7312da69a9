//! Webhook Delivery Service (spec.md §4.7): signs and POSTs a task's
//! result to the task owner's configured webhook URL, retrying on
//! failure per a fixed schedule. Grounded on
//! `fc-outbox::http_dispatcher::HttpDispatcher` for the reqwest client
//! shape and status-to-outcome mapping, and on
//! `fc-scheduler::auth::DispatchAuthService` for HMAC signing.

pub mod retry;
pub mod signing;

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use torale_common::{Result, ToraleError};
use torale_repositories::{WebhookDelivery, WebhookDeliveryRepository, WebhookDeliveryStatus};

#[derive(Debug, Clone)]
pub struct WebhookDeliveryConfig {
    pub request_timeout: Duration,
}

impl Default for WebhookDeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WebhookDeliveryService {
    repo: WebhookDeliveryRepository,
    client: reqwest::Client,
}

impl WebhookDeliveryService {
    pub fn new(repo: WebhookDeliveryRepository, config: WebhookDeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ToraleError::Webhook(e.to_string()))?;
        Ok(Self { repo, client })
    }

    /// Enqueue a new delivery and attempt it immediately (attempt 1 has no
    /// delay per the retry schedule).
    pub async fn enqueue(
        &self,
        task_id: Uuid,
        webhook_url: &str,
        payload: &Value,
        webhook_secret: Option<&str>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.repo.create(id, task_id, webhook_url, payload, webhook_secret).await?;
        self.attempt(id).await?;
        Ok(id)
    }

    /// Attempt delivery of an existing row, whatever its current
    /// `attempt_number`. Used both for the immediate first attempt and by
    /// the retry poll loop.
    pub async fn attempt(&self, delivery_id: Uuid) -> Result<()> {
        let delivery = self
            .repo
            .find_by_id(delivery_id)
            .await?
            .ok_or_else(|| ToraleError::Webhook(format!("webhook delivery {delivery_id} not found")))?;

        if delivery.delivered_at.is_some() {
            return Ok(());
        }

        let next_attempt_number = delivery.attempt_number + 1;

        let Some(secret) = delivery.webhook_secret.as_deref() else {
            warn!(delivery_id = %delivery_id, "webhook delivery has no secret, failing permanently");
            self.repo
                .mark_permanently_failed(delivery_id, "Missing webhook secret for retry")
                .await?;
            return Ok(());
        };

        let body = torale_common::canonical_json(&delivery.payload);
        let timestamp = Utc::now().timestamp();
        let signature = signing::sign(&body, secret, timestamp);

        debug!(delivery_id = %delivery_id, attempt = next_attempt_number, url = %delivery.webhook_url, "delivering webhook");

        let response = self
            .client
            .post(&delivery.webhook_url)
            .header("Content-Type", "application/json")
            .header("X-Torale-Signature", signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status_code = resp.status().as_u16() as i32;
                let response_body = resp.text().await.unwrap_or_default();
                self.repo.mark_delivered(delivery_id, status_code, &response_body).await?;
                debug!(delivery_id = %delivery_id, "webhook delivered");
                Ok(())
            }
            Ok(resp) => {
                let status_code = resp.status().as_u16() as i32;
                let response_body = resp.text().await.unwrap_or_default();
                self.record_failure(&delivery, next_attempt_number, Some(status_code), &response_body)
                    .await
            }
            Err(e) => {
                error!(delivery_id = %delivery_id, error = %e, "webhook request failed");
                self.record_failure(&delivery, next_attempt_number, None, &e.to_string()).await
            }
        }
    }

    async fn record_failure(
        &self,
        delivery: &WebhookDelivery,
        next_attempt_number: i32,
        response_code: Option<i32>,
        detail: &str,
    ) -> Result<()> {
        match retry::next_retry_at(next_attempt_number, Utc::now()) {
            Some(next_retry_at) => {
                self.repo
                    .schedule_retry(delivery.id, next_attempt_number, next_retry_at, response_code, detail)
                    .await
            }
            None => {
                self.repo
                    .mark_permanently_failed(
                        delivery.id,
                        &format!("exhausted {} attempts, last error: {detail}", retry::MAX_ATTEMPTS),
                    )
                    .await
            }
        }
    }

    /// Drive the retry poll loop: attempt every row whose `next_retry_at`
    /// has passed.
    pub async fn process_due_retries(&self) -> Result<usize> {
        let due = self.repo.find_due_for_retry().await?;
        let count = due.len();
        for delivery in due {
            if let Err(e) = self.attempt(delivery.id).await {
                error!(delivery_id = %delivery.id, error = %e, "retry attempt errored");
            }
        }
        Ok(count)
    }
}

#[allow(dead_code)]
fn is_terminal(status: WebhookDeliveryStatus) -> bool {
    matches!(status, WebhookDeliveryStatus::Success | WebhookDeliveryStatus::Failed)
}

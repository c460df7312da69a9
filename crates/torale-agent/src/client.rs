//! Agent Client (spec.md §4.5): one monitoring invocation over JSON-RPC,
//! with exponential-backoff polling and free-to-paid tier fallback.
//! Grounded on `fc-outbox::http_dispatcher::HttpDispatcher` for the
//! `reqwest::Client` construction and on `fc-scheduler`'s poll-loop
//! structuring (`tokio::time::sleep` between bounded attempts).

use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{
    Artifact, ArtifactPart, GetTaskParams, GetTaskResult, JsonRpcRequest, JsonRpcResponse, Message,
    MessageConfiguration, MessagePart, MonitoringResponse, SendMessageParams, SendMessageResult,
};

const BACKOFF_SECS: [f64; 7] = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
const POLL_DEADLINE: Duration = Duration::from_secs(120);
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent task failed: {0}")]
    TaskFailed(String),
    #[error("agent transport error: {0}")]
    Transport(String),
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Seam substituted by tests with an in-memory fake, the way `QueuePublisher`
/// is substituted in the teacher's scheduler tests.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send_message(&self, url: &str, prompt: &str) -> Result<String, AgentError>;
    async fn get_task(&self, url: &str, task_id: &str) -> Result<GetTaskResult, AgentError>;
}

#[derive(Clone)]
pub struct HttpAgentTransport {
    client: reqwest::Client,
}

impl HttpAgentTransport {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send_message(&self, url: &str, prompt: &str) -> Result<String, AgentError> {
        let request = JsonRpcRequest::new(
            1,
            "send_message",
            SendMessageParams {
                message: Message {
                    message_id: generate_message_id(),
                    role: "user",
                    parts: vec![MessagePart::Text { text: prompt.to_string() }],
                },
                configuration: MessageConfiguration {
                    accepted_output_modes: vec!["application/json"],
                },
            },
        );
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let body: JsonRpcResponse<SendMessageResult> =
            response.json().await.map_err(|e| AgentError::Transport(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(AgentError::Transport(error.message));
        }
        body.result
            .map(|r| r.task_id)
            .ok_or_else(|| AgentError::InvalidResponse("send_message returned no task_id".into()))
    }

    async fn get_task(&self, url: &str, task_id: &str) -> Result<GetTaskResult, AgentError> {
        let request = JsonRpcRequest::new(2, "get_task", GetTaskParams { task_id: task_id.to_string() });
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let body: JsonRpcResponse<GetTaskResult> =
            response.json().await.map_err(|e| AgentError::Transport(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(AgentError::Transport(error.message));
        }
        body.result.ok_or_else(|| AgentError::InvalidResponse("get_task returned no result".into()))
    }
}

fn generate_message_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("msg-{}", hex::encode(bytes))
}

#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    pub url_free: String,
    pub url_paid: String,
}

#[derive(Clone)]
pub struct AgentClient<T: AgentTransport> {
    transport: T,
    config: AgentClientConfig,
}

impl<T: AgentTransport> AgentClient<T> {
    pub fn new(transport: T, config: AgentClientConfig) -> Self {
        Self { transport, config }
    }

    /// Run one monitoring invocation, falling back from the free to the
    /// paid agent URL if the free tier signals a rate limit.
    pub async fn invoke(&self, prompt: &str) -> Result<MonitoringResponse, AgentError> {
        match self.invoke_against(&self.config.url_free, prompt).await {
            Ok(response) => Ok(response),
            Err(e) if is_rate_limited(&e) => {
                warn!("free agent tier rate-limited, retrying against paid tier");
                self.invoke_against(&self.config.url_paid, prompt).await
            }
            Err(e) => Err(e),
        }
    }

    async fn invoke_against(&self, url: &str, prompt: &str) -> Result<MonitoringResponse, AgentError> {
        let task_id = self.transport.send_message(url, prompt).await?;
        self.poll_until_complete(url, &task_id).await
    }

    async fn poll_until_complete(&self, url: &str, task_id: &str) -> Result<MonitoringResponse, AgentError> {
        let start = tokio::time::Instant::now();
        let mut attempt = 0usize;
        let mut consecutive_failures = 0u32;

        loop {
            if start.elapsed() >= POLL_DEADLINE {
                return Err(AgentError::Timeout(POLL_DEADLINE));
            }

            match self.transport.get_task(url, task_id).await {
                Ok(result) => {
                    consecutive_failures = 0;
                    match result.status.state.as_str() {
                        "completed" => return parse_monitoring_response(&result.artifacts),
                        "failed" => return Err(AgentError::TaskFailed(result.status.state)),
                        _ => {
                            debug!(task_id = %task_id, state = %result.status.state, "task still in progress");
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(task_id = %task_id, error = %e, consecutive_failures, "poll attempt failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        return Err(e);
                    }
                }
            }

            let delay_secs = BACKOFF_SECS[attempt.min(BACKOFF_SECS.len() - 1)];
            tokio::time::sleep(Duration::from_secs_f64(delay_secs)).await;
            attempt += 1;
        }
    }
}

fn is_rate_limited(error: &AgentError) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("429") || message.contains("rate limit") || message.contains("quota")
}

/// Prefer the first `data` artifact part; fall back to concatenated text
/// parts parsed as JSON, then a permissive single-quoted-literal rewrite,
/// matching the original service's "safe literal eval" fallback for agents
/// that emit Python-style dict text instead of JSON.
fn parse_monitoring_response(artifacts: &[Artifact]) -> Result<MonitoringResponse, AgentError> {
    for artifact in artifacts {
        for part in &artifact.parts {
            if let ArtifactPart::Data { data } = part {
                return parse_value(data.clone());
            }
        }
    }

    let text: String = artifacts
        .iter()
        .flat_map(|a| &a.parts)
        .filter_map(|p| match p {
            ArtifactPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(AgentError::InvalidResponse("no artifact parts in completed task".into()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return parse_value(value);
    }

    if let Some(value) = parse_python_literal(&text) {
        return parse_value(value);
    }

    let preview: String = text.chars().take(200).collect();
    Err(AgentError::InvalidResponse(preview))
}

fn parse_value(value: Value) -> Result<MonitoringResponse, AgentError> {
    serde_json::from_value(value).map_err(|e| AgentError::InvalidResponse(e.to_string()))
}

/// Best-effort rewrite of a Python-style dict literal (single quotes,
/// `None`/`True`/`False`) into valid JSON, for agents that don't honor
/// `accepted_output_modes` strictly.
fn parse_python_literal(text: &str) -> Option<Value> {
    let rewritten = text
        .replace("None", "null")
        .replace("True", "true")
        .replace("False", "false")
        .replace('\'', "\"");
    serde_json::from_str(&rewritten).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskStatus;
    use serde_json::json;

    fn data_artifact(value: Value) -> Vec<Artifact> {
        vec![Artifact { parts: vec![ArtifactPart::Data { data: value }] }]
    }

    fn sample_response_json() -> Value {
        json!({
            "evidence": "price checked",
            "sources": ["https://example.com"],
            "confidence": 90,
            "next_run": null,
            "notification": "Price dropped!",
            "topic": "Laptop price"
        })
    }

    #[test]
    fn parse_monitoring_response_prefers_data_part() {
        let artifacts = data_artifact(sample_response_json());
        let response = parse_monitoring_response(&artifacts).unwrap();
        assert_eq!(response.confidence, 90);
        assert_eq!(response.evidence, "price checked");
    }

    #[test]
    fn parse_monitoring_response_falls_back_to_text_json() {
        let artifacts = vec![Artifact {
            parts: vec![ArtifactPart::Text { text: sample_response_json().to_string() }],
        }];
        let response = parse_monitoring_response(&artifacts).unwrap();
        assert_eq!(response.confidence, 90);
    }

    #[test]
    fn parse_monitoring_response_falls_back_to_python_literal() {
        let literal = "{'evidence': 'checked', 'sources': [], 'confidence': 50, 'next_run': None, 'notification': None, 'topic': None}";
        let artifacts = vec![Artifact { parts: vec![ArtifactPart::Text { text: literal.to_string() }] }];
        let response = parse_monitoring_response(&artifacts).unwrap();
        assert_eq!(response.confidence, 50);
        assert_eq!(response.next_run, None);
    }

    #[test]
    fn parse_monitoring_response_errors_with_preview_on_garbage() {
        let artifacts = vec![Artifact { parts: vec![ArtifactPart::Text { text: "not json at all".repeat(30) }] }];
        let err = parse_monitoring_response(&artifacts).unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
    }

    #[test]
    fn is_rate_limited_detects_known_markers() {
        assert!(is_rate_limited(&AgentError::Transport("HTTP 429 Too Many Requests".into())));
        assert!(is_rate_limited(&AgentError::Transport("rate limit exceeded".into())));
        assert!(is_rate_limited(&AgentError::Transport("quota exceeded".into())));
        assert!(!is_rate_limited(&AgentError::Transport("connection refused".into())));
    }

    #[test]
    fn message_id_has_expected_shape() {
        let id = generate_message_id();
        assert!(id.starts_with("msg-"));
        assert_eq!(id.len(), "msg-".len() + 12);
    }

    struct FixedTransport {
        responses: std::sync::Mutex<Vec<Result<GetTaskResult, AgentError>>>,
    }

    #[async_trait]
    impl AgentTransport for FixedTransport {
        async fn send_message(&self, _url: &str, _prompt: &str) -> Result<String, AgentError> {
            Ok("task-1".to_string())
        }

        async fn get_task(&self, _url: &str, _task_id: &str) -> Result<GetTaskResult, AgentError> {
            let mut guard = self.responses.lock().unwrap();
            guard.pop().unwrap_or(Err(AgentError::Transport("exhausted".into())))
        }
    }

    #[tokio::test]
    async fn invoke_returns_completed_result() {
        let transport = FixedTransport {
            responses: std::sync::Mutex::new(vec![Ok(GetTaskResult {
                status: TaskStatus { state: "completed".into() },
                artifacts: data_artifact(sample_response_json()),
            })]),
        };
        let client = AgentClient::new(
            transport,
            AgentClientConfig { url_free: "http://free".into(), url_paid: "http://paid".into() },
        );
        let response = client.invoke("do the thing").await.unwrap();
        assert_eq!(response.confidence, 90);
    }

    #[tokio::test]
    async fn invoke_surfaces_task_failed() {
        let transport = FixedTransport {
            responses: std::sync::Mutex::new(vec![Ok(GetTaskResult {
                status: TaskStatus { state: "failed".into() },
                artifacts: vec![],
            })]),
        };
        let client = AgentClient::new(
            transport,
            AgentClientConfig { url_free: "http://free".into(), url_paid: "http://paid".into() },
        );
        let err = client.invoke("do the thing").await.unwrap_err();
        assert!(matches!(err, AgentError::TaskFailed(_)));
    }
}

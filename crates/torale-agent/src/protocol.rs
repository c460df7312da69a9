//! Wire types for the agent's JSON-RPC `send_message`/`get_task` protocol
//! (spec.md §4.5).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: P,
}

impl<P> JsonRpcRequest<P> {
    pub fn new(id: u64, method: &'static str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<R> {
    #[serde(default)]
    pub result: Option<R>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageParams {
    pub message: Message,
    pub configuration: MessageConfiguration,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message_id: String,
    pub role: &'static str,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageConfiguration {
    pub accepted_output_modes: Vec<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResult {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetTaskParams {
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTaskResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub parts: Vec<ArtifactPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactPart {
    Data { data: Value },
    Text { text: String },
}

/// The structured payload the agent returns on task completion.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MonitoringResponse {
    pub evidence: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub confidence: i64,
    #[serde(default)]
    pub next_run: Option<String>,
    #[serde(default)]
    pub notification: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

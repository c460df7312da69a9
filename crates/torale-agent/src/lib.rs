//! Agent Client (spec.md §4.5): JSON-RPC `send_message`/`get_task`
//! invocation against the monitoring agent, with exponential backoff and
//! free-to-paid tier fallback.

pub mod client;
pub mod protocol;

pub use client::{AgentClient, AgentClientConfig, AgentError, AgentTransport, HttpAgentTransport};
pub use protocol::MonitoringResponse;

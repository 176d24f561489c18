use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::AgentDescriptor;
use crate::error::TransportError;

/// Reserved task name for answering a paused input-required exchange.
pub const CONTINUE_TASK: &str = "continue_task";

/// Reserved task name for polling a submitted or working task by id.
pub const TASKS_GET: &str = "tasks/get";

/// One request/response exchange with a remote agent.
///
/// Implementations serialize a single call for the agent's protocol and
/// return the raw response body. They must not retry; failure isolation is
/// handled by the caller's circuit breaker.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn send_tool_call(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TransportError>;
}

pub fn continuation_params(context_id: Option<&str>, input: Value) -> Value {
    json!({
        "context_id": context_id,
        "input": input,
    })
}

pub fn poll_params(task_id: &str) -> Value {
    json!({ "task_id": task_id })
}

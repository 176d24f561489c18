use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentDescriptor, AgentId, Protocol};
use crate::conversation::ConversationMessage;
use crate::error::ErrorKind;
use crate::response::InputRequest;
use crate::status::TaskStatus;

/// Continuation handle for a task the agent accepted for later completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedHandle {
    pub task_id: String,
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Resume handle for a clarification parked in the deferred store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredHandle {
    pub token: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub protocol: Protocol,
    pub task_name: String,
    pub status: TaskStatus,
    pub clarification_rounds: u32,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// The value every executor operation hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: TaskMetadata,
    pub conversation: Vec<ConversationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_request: Option<InputRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted: Option<SubmittedHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<DeferredHandle>,
}

impl TaskResult {
    pub fn new(
        status: TaskStatus,
        agent: &AgentDescriptor,
        task_name: &str,
        task_id: String,
    ) -> Self {
        Self {
            success: !status.is_failure(),
            status,
            data: None,
            error: None,
            metadata: TaskMetadata {
                task_id,
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                protocol: agent.protocol,
                task_name: task_name.to_string(),
                status,
                clarification_rounds: 0,
                response_time_ms: 0,
                error_kind: None,
            },
            conversation: Vec::new(),
            input_request: None,
            submitted: None,
            deferred: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>, kind: ErrorKind) -> Self {
        self.success = false;
        self.error = Some(message.into());
        self.metadata.error_kind = Some(kind);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.status.is_paused()
    }
}

/// One-shot view of a submitted task, as returned by `tasks/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

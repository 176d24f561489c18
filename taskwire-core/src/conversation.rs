use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    InputResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub kind: MessageKind,
    pub tool_name: String,
    pub timestamp_ms: i64,
    /// Set on input responses so later rounds can see which field was answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: Value,
    pub metadata: MessageMetadata,
}

impl ConversationMessage {
    fn new(role: MessageRole, kind: MessageKind, tool_name: &str, content: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            metadata: MessageMetadata {
                kind,
                tool_name: tool_name.to_string(),
                timestamp_ms: Utc::now().timestamp_millis(),
                field: None,
            },
        }
    }
}

/// Append-only record of every request, response and clarification answer
/// exchanged during one task execution, in causal order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationLedger {
    messages: Vec<ConversationMessage>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a ledger persisted by an earlier execution.
    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }

    pub fn push_request(&mut self, tool_name: &str, params: Value) {
        self.messages.push(ConversationMessage::new(
            MessageRole::User,
            MessageKind::Request,
            tool_name,
            params,
        ));
    }

    pub fn push_response(&mut self, tool_name: &str, raw: Value) {
        self.messages.push(ConversationMessage::new(
            MessageRole::Agent,
            MessageKind::Response,
            tool_name,
            raw,
        ));
    }

    pub fn push_input_response(&mut self, tool_name: &str, field: Option<String>, input: Value) {
        let mut message =
            ConversationMessage::new(MessageRole::User, MessageKind::InputResponse, tool_name, input);
        message.metadata.field = field;
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ConversationMessage> {
        self.messages
    }
}

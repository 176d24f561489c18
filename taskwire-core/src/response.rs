use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::TaskStatus;

/// Key under which auxiliary human-readable text is attached to a payload.
pub const MESSAGE_KEY: &str = "_message";

/// A request from the agent for more input before it can continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

/// Which wire shape a raw response is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Mcp,
    A2a,
    /// The serialized form of an already-normalized response.
    Canonical,
}

impl From<crate::agent::Protocol> for ResponseShape {
    fn from(protocol: crate::agent::Protocol) -> Self {
        match protocol {
            crate::agent::Protocol::Mcp => Self::Mcp,
            crate::agent::Protocol::A2a => Self::A2a,
        }
    }
}

/// What a normalized response carries. Exactly one per response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Payload(Value),
    Error(String),
    InputRequest(InputRequest),
    /// Intermediate status marker for working/submitted responses.
    Pending,
}

/// Canonical, protocol-independent view of one agent response.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub status: TaskStatus,
    pub body: ResponseBody,
    pub task_id: Option<String>,
    pub context_id: Option<String>,
    pub webhook_url: Option<String>,
}

impl NormalizedResponse {
    fn with_body(status: TaskStatus, body: ResponseBody) -> Self {
        Self {
            status,
            body,
            task_id: None,
            context_id: None,
            webhook_url: None,
        }
    }

    pub fn completed(payload: Value) -> Self {
        Self::with_body(TaskStatus::Completed, ResponseBody::Payload(payload))
    }

    pub fn failed(status: TaskStatus, message: impl Into<String>) -> Self {
        debug_assert!(status.is_failure());
        Self::with_body(status, ResponseBody::Error(message.into()))
    }

    pub fn input_required(request: InputRequest) -> Self {
        let context_id = request.context_id.clone();
        let mut response = Self::with_body(TaskStatus::InputRequired, ResponseBody::InputRequest(request));
        response.context_id = context_id;
        response
    }

    pub fn pending(status: TaskStatus) -> Self {
        Self::with_body(status, ResponseBody::Pending)
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        if task_id.is_some() {
            self.task_id = task_id;
        }
        self
    }

    pub fn with_context_id(mut self, context_id: Option<String>) -> Self {
        if context_id.is_some() {
            self.context_id = context_id;
        }
        self
    }

    pub fn with_webhook_url(mut self, webhook_url: Option<String>) -> Self {
        if webhook_url.is_some() {
            self.webhook_url = webhook_url;
        }
        self
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Payload(value) => Some(value),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn input_request(&self) -> Option<&InputRequest> {
        match &self.body {
            ResponseBody::InputRequest(request) => Some(request),
            _ => None,
        }
    }

    /// Serialize to the canonical `{status, data|error|input_request, ...}`
    /// shape. Normalizing this value again yields an equal response.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("status".into(), Value::String(self.status.as_str().into()));
        match &self.body {
            ResponseBody::Payload(payload) => {
                out.insert("data".into(), payload.clone());
            }
            ResponseBody::Error(message) => {
                out.insert("error".into(), Value::String(message.clone()));
            }
            ResponseBody::InputRequest(request) => {
                out.insert(
                    "input_request".into(),
                    serde_json::to_value(request).unwrap_or(Value::Null),
                );
            }
            ResponseBody::Pending => {}
        }
        for (key, value) in [
            ("task_id", &self.task_id),
            ("context_id", &self.context_id),
            ("webhook_url", &self.webhook_url),
        ] {
            if let Some(value) = value {
                out.insert(key.into(), Value::String(value.clone()));
            }
        }
        Value::Object(out)
    }
}

/// Status-level facts read from a raw response before any payload extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusScan {
    pub status: Option<String>,
    pub task_id: Option<String>,
    pub context_id: Option<String>,
    pub webhook_url: Option<String>,
    /// Human-readable text accompanying the status (question or failure reason).
    pub message: Option<String>,
    pub field: Option<String>,
    pub suggestions: Vec<String>,
    /// Message from an error envelope, if the response is one.
    pub error: Option<String>,
}

impl StatusScan {
    pub fn parsed_status(&self) -> Option<TaskStatus> {
        self.status.as_deref().and_then(TaskStatus::parse)
    }

    pub fn input_request(&self) -> InputRequest {
        InputRequest {
            question: self
                .message
                .clone()
                .unwrap_or_else(|| "Additional input required".to_string()),
            field: self.field.clone(),
            suggestions: self.suggestions.clone(),
            context_id: self.context_id.clone(),
        }
    }
}

/// Read a string-valued field from the first of `keys` present on `value`.
pub fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Attach `_message` to an object payload. Non-object payloads are left alone.
pub fn attach_message(payload: &mut Value, message: Option<String>) {
    if let (Value::Object(map), Some(message)) = (payload, message) {
        if !message.is_empty() {
            map.insert(MESSAGE_KEY.into(), Value::String(message));
        }
    }
}

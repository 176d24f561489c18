use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound status notification posted by an agent to a registered callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub operation_id: String,
    pub task_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Re-express the notification in the canonical response shape so it is
    /// interpreted exactly like a polled or live response.
    pub fn to_canonical(&self) -> Value {
        let mut out = Map::new();
        out.insert("status".into(), Value::String(self.status.clone()));
        if let Some(result) = &self.result {
            out.insert("data".into(), result.clone());
        }
        if let Some(error) = &self.error {
            out.insert("error".into(), Value::String(error.clone()));
        }
        if let Some(task_id) = &self.task_id {
            out.insert("task_id".into(), Value::String(task_id.clone()));
        }
        if let Some(context_id) = &self.context_id {
            out.insert("context_id".into(), Value::String(context_id.clone()));
        }
        Value::Object(out)
    }
}

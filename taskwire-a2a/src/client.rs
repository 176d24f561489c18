use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskwire_core::{AgentDescriptor, CONTINUE_TASK, TASKS_GET, ToolTransport, TransportError};
use tracing::debug;

use crate::types::{
    A2aMessage, MessageSendParams, Part, PushNotificationConfig, TaskConfiguration,
    TaskQueryParams,
};

/// Key in tool params under which the executor passes a webhook registration.
pub const PUSH_NOTIFICATION_KEY: &str = "push_notification_config";

/// A2A client issuing JSON-RPC `message/send` and `tasks/get` calls.
///
/// The JSON-RPC body is returned as-is, error envelopes included, so that
/// normalization can turn agent-reported errors into task results.
#[derive(Clone)]
pub struct A2aHttpTransport {
    http: reqwest::Client,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl A2aHttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Connection {
                endpoint: "<client>".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            http,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn post(&self, agent: &AgentDescriptor, body: &Value) -> Result<Value, TransportError> {
        let mut builder = self
            .http
            .post(&agent.agent_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = &agent.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Connection {
                    endpoint: agent.agent_uri.clone(),
                    reason: err.to_string(),
                }
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connection {
                endpoint: agent.agent_uri.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }
}

/// Translate a tool call into the JSON-RPC method and params A2A expects.
pub fn build_request(id: u64, task_name: &str, mut params: Value) -> Result<Value, TransportError> {
    let (method, params) = match task_name {
        TASKS_GET => {
            let task_id = params
                .get("task_id")
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::InvalidResponse("tasks/get requires task_id".into()))?;
            let query = TaskQueryParams {
                id: task_id.to_string(),
            };
            ("tasks/get", to_params(&query)?)
        }
        CONTINUE_TASK => {
            let input = params.get("input").cloned().unwrap_or(Value::Null);
            let mut message = A2aMessage::user(vec![Part::Data {
                data: json!({ "input": input }),
            }]);
            message.context_id = params
                .get("context_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let send = MessageSendParams {
                message,
                configuration: None,
            };
            ("message/send", to_params(&send)?)
        }
        skill => {
            let push = take_push_config(&mut params);
            let send = MessageSendParams {
                message: A2aMessage::skill_call(skill, params),
                configuration: push.map(|config| TaskConfiguration {
                    push_notification_config: Some(config),
                    ..TaskConfiguration::default()
                }),
            };
            ("message/send", to_params(&send)?)
        }
    };
    Ok(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
}

fn take_push_config(params: &mut Value) -> Option<PushNotificationConfig> {
    let raw = params.as_object_mut()?.remove(PUSH_NOTIFICATION_KEY)?;
    serde_json::from_value(raw).ok()
}

fn to_params<T: serde::Serialize>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value).map_err(|err| TransportError::InvalidResponse(err.to_string()))
}

#[async_trait]
impl ToolTransport for A2aHttpTransport {
    async fn send_tool_call(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = build_request(id, task_name, params)?;
        debug!(agent_id = %agent.id, task_name, method = %body["method"], "a2a request");
        self.post(agent, &body).await
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskwire_core::{AgentDescriptor, ToolTransport, TransportError};
use tracing::debug;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Stateless MCP client issuing one JSON-RPC `tools/call` POST per call.
#[derive(Clone)]
pub struct McpHttpTransport {
    http: reqwest::Client,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl McpHttpTransport {
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
}

#[async_trait]
impl ToolTransport for McpHttpTransport {
    async fn send_tool_call(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::tool_call(id, task_name, params);
        debug!(agent_id = %agent.id, task_name, request_id = id, "mcp tools/call");

        let mut builder = self
            .http
            .post(&agent.agent_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request);
        if let Some(token) = &agent.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(&agent.agent_uri, self.timeout, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connection {
                endpoint: agent.agent_uri.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        body.into_result()
    }
}

fn map_reqwest_error(endpoint: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Connection {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskwire_a2a::A2aHttpTransport;
use taskwire_core::{AgentDescriptor, Protocol, ToolTransport, TransportError};
use taskwire_mcp::McpHttpTransport;

/// Dispatches each call to the transport for the agent's declared protocol.
#[derive(Clone)]
pub struct ProtocolRouter {
    mcp: Arc<dyn ToolTransport>,
    a2a: Arc<dyn ToolTransport>,
}

impl ProtocolRouter {
    pub fn new(mcp: Arc<dyn ToolTransport>, a2a: Arc<dyn ToolTransport>) -> Self {
        Self { mcp, a2a }
    }

    /// HTTP transports for both protocols sharing one request timeout.
    pub fn http(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self::new(
            Arc::new(McpHttpTransport::new(timeout)?),
            Arc::new(A2aHttpTransport::new(timeout)?),
        ))
    }
}

#[async_trait]
impl ToolTransport for ProtocolRouter {
    async fn send_tool_call(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        match agent.protocol {
            Protocol::Mcp => self.mcp.send_tool_call(agent, task_name, params).await,
            Protocol::A2a => self.a2a.send_tool_call(agent, task_name, params).await,
        }
    }
}

use serde::{Deserialize, Serialize};

pub type AgentId = String;

/// Wire protocol spoken by a remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// JSON-RPC `tools/call` with `structuredContent` results.
    Mcp,
    /// JSON-RPC `message/send` with artifact-based results.
    A2a,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mcp => write!(f, "mcp"),
            Self::A2a => write!(f, "a2a"),
        }
    }
}

/// Protocol identity of a remote agent. Owned by the caller and passed by
/// reference into every executor operation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub agent_uri: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<AgentId>,
        name: impl Into<String>,
        agent_uri: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_uri: agent_uri.into(),
            protocol,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

// Auth material stays out of logs and debug output.
impl std::fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agent_uri", &self.agent_uri)
            .field("protocol", &self.protocol)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::AgentDescriptor;
use crate::conversation::ConversationMessage;
use crate::error::StorageError;

/// A clarification parked until a later `resume(token, value)`.
///
/// The agent's `auth_token` is never written out; serialized state carries
/// the agent identity only and credentials are supplied again at resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredState {
    pub task_name: String,
    pub params: Value,
    #[serde(serialize_with = "agent_without_credentials")]
    pub agent: AgentDescriptor,
    pub context_id: Option<String>,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub conversation: Vec<ConversationMessage>,
}

fn agent_without_credentials<S: Serializer>(agent: &AgentDescriptor, serializer: S) -> Result<S::Ok, S::Error> {
    let mut agent = agent.clone();
    agent.auth_token = None;
    agent.serialize(serializer)
}

/// Pluggable persistence for deferred clarifications, keyed by an opaque token.
#[async_trait]
pub trait DeferredTaskStore: Send + Sync {
    async fn get(&self, token: &str) -> Result<Option<DeferredState>, StorageError>;

    async fn set(&self, token: &str, state: DeferredState) -> Result<(), StorageError>;

    async fn delete(&self, token: &str) -> Result<(), StorageError>;
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct InMemoryDeferredStore {
    states: RwLock<HashMap<String, DeferredState>>,
}

impl InMemoryDeferredStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl DeferredTaskStore for InMemoryDeferredStore {
    async fn get(&self, token: &str) -> Result<Option<DeferredState>, StorageError> {
        Ok(self.states.read().await.get(token).cloned())
    }

    async fn set(&self, token: &str, state: DeferredState) -> Result<(), StorageError> {
        self.states.write().await.insert(token.to_string(), state);
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.states.write().await.remove(token);
        Ok(())
    }
}

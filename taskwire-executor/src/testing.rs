//! Scripted collaborators for executor tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use taskwire_core::{
    AgentDescriptor, DeferredState, DeferredTaskStore, InMemoryDeferredStore, StorageError,
    ToolTransport, TransportError,
};

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub agent_id: String,
    pub auth_token: Option<String>,
    pub task_name: String,
    pub params: Value,
}

/// Replays queued responses in order, then `fallback` if set.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    fallback: Option<Value>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn repeating(response: Value) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(vec![])
        }
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn send_tool_call(
        &self,
        agent: &AgentDescriptor,
        task_name: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            agent_id: agent.id.clone(),
            auth_token: agent.auth_token.clone(),
            task_name: task_name.to_string(),
            params,
        });
        let next = self.responses.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(TransportError::InvalidResponse("no scripted response left".into())),
        }
    }
}

/// In-memory store that counts writes and can be told to fail them.
#[derive(Default)]
pub(crate) struct RecordingStore {
    inner: InMemoryDeferredStore,
    sets: AtomicUsize,
    deletes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub(crate) fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeferredTaskStore for RecordingStore {
    async fn get(&self, token: &str) -> Result<Option<DeferredState>, StorageError> {
        self.inner.get(token).await
    }

    async fn set(&self, token: &str, state: DeferredState) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("store offline".into()));
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(token, state).await
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(token).await
    }
}

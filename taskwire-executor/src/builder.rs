use std::collections::HashMap;
use std::sync::Arc;

use taskwire_core::config::{CircuitBreakerConfig, ExecutorConfig};
use taskwire_core::{AgentDescriptor, AgentId, DeferredTaskStore, InMemoryDeferredStore, ToolTransport};

use crate::async_completion::{AsyncCompletionManager, WebhookManager};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::contracts::OutputContracts;
use crate::executor::TaskExecutor;
use crate::normalizer::ResponseNormalizer;

/// Assembles a [`TaskExecutor`] from its collaborators.
///
/// Anything not supplied falls back to defaults: an in-memory deferred
/// store, a fresh breaker registry, no output contracts and no webhooks.
pub struct TaskExecutorBuilder {
    transport: Arc<dyn ToolTransport>,
    config: ExecutorConfig,
    breaker_config: CircuitBreakerConfig,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    store: Option<Arc<dyn DeferredTaskStore>>,
    contracts: OutputContracts,
    webhooks: Option<Arc<WebhookManager>>,
    agents: HashMap<AgentId, AgentDescriptor>,
}

impl TaskExecutorBuilder {
    pub fn new(transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            transport,
            config: ExecutorConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            breakers: None,
            store: None,
            contracts: OutputContracts::new(),
            webhooks: None,
            agents: HashMap::new(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Share one breaker registry between several executors.
    pub fn breaker_registry(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn deferred_store(mut self, store: Arc<dyn DeferredTaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn contracts(mut self, contracts: OutputContracts) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn webhooks(mut self, webhooks: Arc<WebhookManager>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    /// Known agents, consulted at resume for credentials that deferred
    /// state does not persist.
    pub fn agents(mut self, agents: impl IntoIterator<Item = AgentDescriptor>) -> Self {
        self.agents
            .extend(agents.into_iter().map(|agent| (agent.id.clone(), agent)));
        self
    }

    pub fn build(self) -> TaskExecutor {
        let normalizer = Arc::new(ResponseNormalizer::new(self.contracts));
        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(CircuitBreakerRegistry::new(self.breaker_config)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryDeferredStore::new()));
        let completions = AsyncCompletionManager::new(
            self.transport.clone(),
            normalizer.clone(),
            breakers.clone(),
            self.webhooks,
        );
        TaskExecutor::from_parts(
            self.transport,
            normalizer,
            breakers,
            store,
            completions,
            self.agents,
            self.config,
        )
    }
}

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use taskwire_core::config::{DeferredBackend, TaskwireConfig};
use taskwire_core::{DeferredTaskStore, InMemoryDeferredStore};
use tracing::info;

use crate::async_completion::WebhookManager;
use crate::builder::TaskExecutorBuilder;
use crate::contracts::OutputContracts;
use crate::executor::TaskExecutor;
use crate::sqlite_store::SqliteDeferredStore;
use crate::transport::ProtocolRouter;

/// Load and deserialize config from a TOML file.
pub fn load_config(path: &Path) -> Result<TaskwireConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: TaskwireConfig =
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

/// Validate config for internal consistency:
/// - agent ids are non-empty and unique, agent URIs are http(s)
/// - numeric knobs are positive
/// - the sqlite backend has a path, the webhook template an operation id
pub fn validate_config(config: &TaskwireConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for agent in &config.agents {
        if agent.id.trim().is_empty() {
            anyhow::bail!("agent '{}' has an empty id", agent.name);
        }
        if !seen.insert(agent.id.as_str()) {
            anyhow::bail!("agent id '{}' is defined more than once", agent.id);
        }
        if !(agent.agent_uri.starts_with("http://") || agent.agent_uri.starts_with("https://")) {
            anyhow::bail!(
                "agent '{}' has agent_uri '{}', expected an http(s) URL",
                agent.id,
                agent.agent_uri
            );
        }
    }

    if config.executor.max_clarifications == 0 {
        anyhow::bail!("executor.max_clarifications must be at least 1");
    }
    if config.executor.poll_interval.is_zero() {
        anyhow::bail!("executor.poll_interval must be greater than zero");
    }
    if config.circuit_breaker.failure_threshold == 0 {
        anyhow::bail!("circuit_breaker.failure_threshold must be at least 1");
    }

    if config.deferred.backend == DeferredBackend::Sqlite && config.deferred.sqlite_path.is_none() {
        anyhow::bail!("deferred.backend = \"sqlite\" requires deferred.sqlite_path");
    }

    if let Some(ref webhooks) = config.webhooks {
        if !webhooks.url_template.contains("{operation_id}") {
            anyhow::bail!(
                "webhooks.url_template '{}' must contain an {{operation_id}} placeholder",
                webhooks.url_template
            );
        }
    }

    Ok(())
}

/// Wire a [`TaskExecutor`] from a validated config: HTTP transports for both
/// protocols, the configured deferred store, output contracts and webhooks.
pub async fn executor_from_config(config: &TaskwireConfig) -> Result<TaskExecutor> {
    let transport = ProtocolRouter::http(config.executor.request_timeout)
        .context("building agent transports")?;

    let store: Arc<dyn DeferredTaskStore> = match config.deferred.backend {
        DeferredBackend::Memory => Arc::new(InMemoryDeferredStore::new()),
        DeferredBackend::Sqlite => {
            let path = config
                .deferred
                .sqlite_path
                .as_deref()
                .context("deferred.sqlite_path is not set")?;
            Arc::new(
                SqliteDeferredStore::open(Path::new(path))
                    .await
                    .with_context(|| format!("opening deferred store: {path}"))?,
            )
        }
    };

    let contracts = match config.contracts.dir {
        Some(ref dir) => OutputContracts::load_dir(Path::new(dir))
            .with_context(|| format!("loading output contracts from {dir}"))?,
        None => OutputContracts::new(),
    };

    let mut builder = TaskExecutorBuilder::new(Arc::new(transport))
        .config(config.executor.clone())
        .circuit_breaker(config.circuit_breaker.clone())
        .deferred_store(store)
        .contracts(contracts)
        .agents(config.agents.iter().cloned());
    if let Some(ref webhooks) = config.webhooks {
        builder = builder.webhooks(Arc::new(WebhookManager::new(webhooks)));
    }

    info!(
        agents = config.agents.len(),
        backend = ?config.deferred.backend,
        webhooks = config.webhooks.is_some(),
        "task executor configured"
    );
    Ok(builder.build())
}

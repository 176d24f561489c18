use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentDescriptor;

/// Top-level taskwire configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskwireConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub webhooks: Option<WebhookConfig>,
    #[serde(default)]
    pub deferred: DeferredStoreConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
}

impl TaskwireConfig {
    pub fn agent(&self, id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|agent| agent.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Advisory bound handed to clarification handlers as `max_attempts`.
    #[serde(default = "default_max_clarifications")]
    pub max_clarifications: u32,
    #[serde(default = "default_poll_interval", with = "humantime_duration")]
    pub poll_interval: Duration,
    /// Poll a `working` task instead of returning it to the caller right away.
    #[serde(default)]
    pub wait_on_working: bool,
    #[serde(default = "default_working_timeout", with = "humantime_duration")]
    pub working_timeout: Duration,
    /// Return `Err(InputRequired)` instead of a paused result when no handler is given.
    #[serde(default)]
    pub throw_on_input_required: bool,
    /// Per-request timeout for the HTTP transports.
    #[serde(default = "default_request_timeout", with = "humantime_duration")]
    pub request_timeout: Duration,
}

fn default_max_clarifications() -> u32 {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_working_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_clarifications: default_max_clarifications(),
            poll_interval: default_poll_interval(),
            wait_on_working: false,
            working_timeout: default_working_timeout(),
            throw_on_input_required: false,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout", with = "humantime_duration")]
    pub reset_timeout: Duration,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Callback URL template. Supports `{agent_id}`, `{task_type}` and
    /// `{operation_id}` placeholders.
    pub url_template: String,
    /// Shared secret for HMAC-SHA256 signature verification.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_signature_tolerance", with = "humantime_duration")]
    pub signature_tolerance: Duration,
}

fn default_signature_tolerance() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeferredBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferredStoreConfig {
    #[serde(default)]
    pub backend: DeferredBackend,
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Directory of `<tool_name>.json` JSON Schema output contracts.
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_json_logs")]
    pub json: bool,
}

fn default_json_logs() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            json: default_json_logs(),
        }
    }
}

/// Serde helper for human-readable durations like "30s", "10m".
mod humantime_duration {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        let secs = duration.as_secs();
        if millis % 1000 != 0 {
            serializer.serialize_str(&format!("{millis}ms"))
        } else if secs % 60 == 0 && secs >= 60 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{secs}s"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {s}")))
    }

    pub(super) fn parse_duration(s: &str) -> Option<Duration> {
        let s = s.trim();
        if let Some(n) = s.strip_suffix("ms") {
            n.parse::<u64>().ok().map(Duration::from_millis)
        } else if let Some(n) = s.strip_suffix('s') {
            n.parse::<u64>().ok().map(Duration::from_secs)
        } else if let Some(n) = s.strip_suffix('m') {
            n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
        } else if let Some(n) = s.strip_suffix('h') {
            n.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().ok().map(Duration::from_secs)
        }
    }
}

use std::collections::HashMap;
use std::path::Path;

use jsonschema::JSONSchema;
use serde_json::Value;
use taskwire_core::NormalizeError;
use taskwire_core::response::MESSAGE_KEY;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("invalid output schema for {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },
    #[error("reading contract {path}: {reason}")]
    Io { path: String, reason: String },
}

/// JSON Schema output contracts keyed by tool name.
#[derive(Default)]
pub struct OutputContracts {
    schemas: HashMap<String, JSONSchema>,
}

impl OutputContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: &str, schema: &Value) -> Result<(), ContractError> {
        let compiled = JSONSchema::compile(schema).map_err(|err| ContractError::InvalidSchema {
            tool: tool.to_string(),
            reason: err.to_string(),
        })?;
        self.schemas.insert(tool.to_string(), compiled);
        Ok(())
    }

    /// Load every `<tool>.json` file in `dir` as the contract for `<tool>`.
    pub fn load_dir(dir: &Path) -> Result<Self, ContractError> {
        let io_err = |path: &Path, err: std::io::Error| ContractError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        };

        let mut contracts = Self::new();
        for entry in std::fs::read_dir(dir).map_err(|err| io_err(dir, err))? {
            let path = entry.map_err(|err| io_err(dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(tool) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path).map_err(|err| io_err(&path, err))?;
            let schema: Value =
                serde_json::from_str(&content).map_err(|err| ContractError::InvalidSchema {
                    tool: tool.to_string(),
                    reason: err.to_string(),
                })?;
            contracts.register(tool, &schema)?;
            tracing::debug!(tool, path = %path.display(), "loaded output contract");
        }
        Ok(contracts)
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.schemas.contains_key(tool)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate a completed payload. Tools without a contract always pass and
    /// the `_message` annotation is never part of the contract.
    pub fn validate(&self, tool: &str, payload: &Value) -> Result<(), NormalizeError> {
        let Some(schema) = self.schemas.get(tool) else {
            return Ok(());
        };

        let mut instance = payload.clone();
        if let Value::Object(map) = &mut instance {
            map.remove(MESSAGE_KEY);
        }

        let violations: Vec<String> = match schema.validate(&instance) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|err| {
                    let path = err.instance_path.to_string();
                    let path = if path.is_empty() { "/".to_string() } else { path };
                    format!("{path}: {err}")
                })
                .collect(),
        };
        Err(NormalizeError::SchemaValidation {
            tool: tool.to_string(),
            violations,
        })
    }
}

impl std::fmt::Debug for OutputContracts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&String> = self.schemas.keys().collect();
        tools.sort();
        f.debug_struct("OutputContracts").field("tools", &tools).finish()
    }
}

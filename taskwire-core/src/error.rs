use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

#[derive(Debug, thiserror::Error)]
pub enum TaskwireError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("circuit breaker open for agent {agent_id}")]
    CircuitOpen { agent_id: AgentId },

    #[error("normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("task timed out after {elapsed:?}")]
    TaskTimeout { elapsed: Duration },

    #[error("input required: {question}")]
    InputRequired { question: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("unknown deferred token: {0}")]
    UnknownDeferredToken(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl TaskwireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::Protocol { .. }) => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transport,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Normalize(NormalizeError::SchemaValidation { .. }) => ErrorKind::SchemaValidation,
            Self::Normalize(NormalizeError::UnrecognizedShape(_)) => ErrorKind::UnrecognizedShape,
            Self::Normalize(_) => ErrorKind::MalformedResponse,
            Self::TaskTimeout { .. } => ErrorKind::Timeout,
            Self::InputRequired { .. } => ErrorKind::InputRequired,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Handler(_) => ErrorKind::Handler,
            Self::UnknownDeferredToken(_) => ErrorKind::UnknownDeferredToken,
            Self::UnknownStatus(_) => ErrorKind::UnknownStatus,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Coarse error classification carried on failed task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    CircuitOpen,
    UnrecognizedShape,
    MalformedResponse,
    SchemaValidation,
    Timeout,
    InputRequired,
    Storage,
    Handler,
    UnknownDeferredToken,
    UnknownStatus,
    Cancelled,
    /// The agent itself reported failure, rejection or cancellation.
    Agent,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("unrecognized response shape: {0}")]
    UnrecognizedShape(String),

    #[error("A2A response is missing result.artifacts")]
    MissingArtifacts,

    #[error("A2A response must have at least one artifact")]
    EmptyArtifacts,

    #[error("A2A artifact {artifact_index} must contain at least one data part")]
    NoDataPart { artifact_index: usize },

    #[error("cannot normalize an intermediate status '{0}'")]
    IntermediateStatus(String),

    #[error("MCP response has no structuredContent and empty content")]
    EmptyContent,

    #[error("MCP text content is not valid JSON: {preview}")]
    InvalidJsonText { preview: String },

    #[error("response for {tool} failed schema validation: {}", .violations.join("; "))]
    SchemaValidation {
        tool: String,
        violations: Vec<String>,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation_formats_violations() {
        let error = NormalizeError::SchemaValidation {
            tool: "get_products".to_string(),
            violations: vec![
                "/products: is a required property".to_string(),
                "/count: not a number".to_string(),
            ],
        };
        assert_eq!(
            error.to_string(),
            "response for get_products failed schema validation: /products: is a required property; /count: not a number"
        );
    }

    #[test]
    fn kind_distinguishes_shape_from_schema_failures() {
        let shape = TaskwireError::from(NormalizeError::UnrecognizedShape("{}".into()));
        let schema = TaskwireError::from(NormalizeError::SchemaValidation {
            tool: "t".into(),
            violations: vec![],
        });
        let protocol = TaskwireError::from(TransportError::Protocol {
            code: -32600,
            message: "bad request".into(),
        });
        assert_eq!(shape.kind(), ErrorKind::UnrecognizedShape);
        assert_eq!(schema.kind(), ErrorKind::SchemaValidation);
        assert_eq!(protocol.kind(), ErrorKind::Protocol);
        assert!(TaskwireError::Cancelled.is_cancelled());
    }
}

pub mod agent;
pub mod config;
pub mod conversation;
pub mod deferred;
pub mod error;
pub mod handler;
pub mod response;
pub mod result;
pub mod status;
pub mod transport;
pub mod webhook;

pub use agent::{AgentDescriptor, AgentId, Protocol};
pub use conversation::{ConversationLedger, ConversationMessage, MessageKind, MessageRole};
pub use deferred::{DeferredState, DeferredTaskStore, InMemoryDeferredStore};
pub use error::{
    ErrorKind, HandlerError, NormalizeError, StorageError, TaskwireError, TransportError,
};
pub use handler::{FnHandler, HandlerContext, HandlerDecision, InputHandler, handler_fn};
pub use response::{InputRequest, NormalizedResponse, ResponseBody, ResponseShape, StatusScan};
pub use result::{DeferredHandle, SubmittedHandle, TaskMetadata, TaskResult, TaskSnapshot};
pub use status::TaskStatus;
pub use transport::{CONTINUE_TASK, TASKS_GET, ToolTransport};
pub use webhook::WebhookPayload;

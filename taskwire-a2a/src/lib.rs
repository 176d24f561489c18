mod client;
pub mod normalize;
pub mod types;

pub use client::{A2aHttpTransport, PUSH_NOTIFICATION_KEY, build_request};
pub use types::{
    A2aArtifact, A2aErrorResponse, A2aMessage, A2aTaskState, MessageSendParams, Part,
    PushNotificationConfig, TaskConfiguration, TaskQueryParams,
};

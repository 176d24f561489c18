pub mod async_completion;
pub mod builder;
pub mod circuit_breaker;
pub mod config;
pub mod contracts;
pub mod executor;
pub mod handlers;
pub mod normalizer;
pub mod sqlite_store;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use async_completion::{
    AsyncCompletionManager, SubmittedContinuation, WebhookManager, WebhookRegistration,
    webhook_router,
};
pub use builder::TaskExecutorBuilder;
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreakerRegistry};
pub use config::{executor_from_config, load_config, validate_config};
pub use contracts::{ContractError, OutputContracts};
pub use executor::{ActiveTaskInfo, ExecuteOptions, TaskExecutor};
pub use handlers::{AutoApproveHandler, DeferAllHandler, FieldFallback, FieldHandler};
pub use normalizer::{ResponseNormalizer, detect_shape};
pub use sqlite_store::SqliteDeferredStore;
pub use telemetry::init_telemetry;
pub use transport::ProtocolRouter;

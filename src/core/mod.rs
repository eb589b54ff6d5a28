//! Core records, error types and storage abstractions.

pub mod error;
pub mod job;
pub mod store;

pub use error::{
    AppResult, ConfigError, CounterError, DispatchError, OrchestratorError, QueueError, RuleError,
    StoreError,
};
pub use job::{
    Deployment, DeploymentId, DeploymentStatus, FlagRecord, Job, JobId, JobStatus, QueueMessage,
    TenantId, UsageRecord,
};
pub use store::{AppendReceipt, CounterStore, DeploymentStore, JobQueue, JobStore};

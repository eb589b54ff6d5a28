//! Storage and queue abstractions shared by every worker instance.
//!
//! Backends live in `crate::infra`; the worker only sees these traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::{CounterError, QueueError, StoreError};
use crate::core::job::{Deployment, DeploymentId, DeploymentStatus, Job, JobId, JobStatus, UsageRecord};

/// Inference queue shared by competing workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a raw message.
    async fn push(&self, raw: String) -> Result<(), QueueError>;
    /// Pop the oldest message, waiting at most `timeout` for one to arrive.
    /// A popped message belongs to the caller only.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;
    /// Current depth.
    async fn len(&self) -> Result<usize, QueueError>;
}

/// Job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job by id.
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError>;
    /// Persist `job` if the stored copy still has status `expected`.
    ///
    /// Fails with [`StoreError::Conflict`] when another actor moved the job
    /// in the meantime, and with [`StoreError::NotFound`] when it vanished.
    async fn save(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError>;
    /// Persist a completed `job` and append its usage record as one unit.
    ///
    /// Same precondition as [`JobStore::save`]. When the append fails the job
    /// is left as stored; a second record for the same job is rejected with
    /// [`StoreError::Duplicate`].
    async fn complete(&self, job: &Job, expected: JobStatus, usage: UsageRecord) -> Result<AppendReceipt, StoreError>;
}

/// Deployment lookup and lazy provisioning.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Load a deployment by id.
    async fn load(&self, id: DeploymentId) -> Result<Option<Deployment>, StoreError>;
    /// Overwrite the provisioning status.
    async fn set_status(&self, id: DeploymentId, status: DeploymentStatus) -> Result<(), StoreError>;
}

/// Outcome of a usage ledger append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    /// This is the first usage ever recorded for the tenant.
    pub first_for_tenant: bool,
}

/// Expiring counters backing the block-rate limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count and remaining time-to-live, `None` when absent or expired.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(u64, Option<Duration>)>, CounterError>;
    /// Increment and return the new count. The expiry is set to `window`
    /// only when the counter is created; later increments keep it.
    async fn increment_with_expiry(&self, key: &str, window: Duration) -> Result<u64, CounterError>;
}

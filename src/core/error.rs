//! Error types for orchestration components.

use std::time::Duration;

use thiserror::Error;

use crate::core::job::{JobId, JobStatus};

/// Errors produced by job, deployment and usage stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A conditional write found the entity in another state.
    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        /// Job being written.
        job_id: JobId,
        /// Status the writer expected to replace.
        expected: JobStatus,
        /// Status actually stored.
        actual: JobStatus,
    },
    /// A usage record already exists for this job.
    #[error("usage already recorded for job {0}")]
    Duplicate(JobId),
    /// Backend unavailable or failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backend unavailable or failed.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced by counter stores backing the block-rate limiter.
#[derive(Debug, Error)]
pub enum CounterError {
    /// Backend unreachable.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// The requested expiry cannot be represented.
    #[error("counter window {0:?} is out of range")]
    WindowOutOfRange(Duration),
}

/// Errors produced while executing a job on the compute backend.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Compute backend could not be reached.
    #[error("compute backend unreachable: {0}")]
    Unreachable(String),
    /// The unit of work reported failure.
    #[error("{0}")]
    Failed(String),
    /// The unit of work did not finish within the allowed wait.
    #[error("timeout after {}s waiting for job completion", .0.as_secs())]
    Timeout(Duration),
    /// The direct inference endpoint failed or answered with an error.
    #[error("inference service unavailable: {0}")]
    Inference(String),
}

/// Error raised by a guardrail rule.
#[derive(Debug, Error)]
#[error("rule {rule} failed: {reason}")]
pub struct RuleError {
    /// Rule that failed.
    pub rule: String,
    /// Failure description.
    pub reason: String,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Configuration parsed but holds an invalid value.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Umbrella error for the per-job pipeline.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed queue message.
    #[error("invalid job message: {0}")]
    Validation(String),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Deployment configuration failure.
    #[error("invalid deployment config: {0}")]
    Config(#[from] ConfigError),
    /// Compute dispatch failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Pipeline panicked.
    #[error("job processing panicked: {0}")]
    Panic(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_reports_seconds() {
        let err = DispatchError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "timeout after 300s waiting for job completion");
    }

    #[test]
    fn config_errors_are_prefixed_in_pipeline() {
        let err: OrchestratorError = ConfigError::Parse("bad".into()).into();
        assert_eq!(err.to_string(), "invalid deployment config: parse error: bad");
    }

    #[test]
    fn dispatch_failure_is_verbatim() {
        let err: OrchestratorError = DispatchError::Failed("Job failed".into()).into();
        assert_eq!(err.to_string(), "Job failed");
    }
}

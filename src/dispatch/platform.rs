//! Orchestration-platform backend: create a unit of work, poll it, then read
//! its result from a shared store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{DeploymentId, DispatchError, JobId, TenantId};
use crate::dispatch::{DispatchRequest, InferenceResult};

/// Input payloads handed to the platform are cut to this many bytes of JSON.
pub const MAX_INPUT_BYTES: usize = 4096;
/// Result store key prefix.
pub const RESULT_KEY_PREFIX: &str = "inference:result";

/// Result store key for a job.
#[must_use]
pub fn result_key(job_id: JobId) -> String {
    format!("{RESULT_KEY_PREFIX}:{job_id}")
}

/// Description of the unit of work submitted to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnitSpec {
    /// Job being run.
    pub job_id: JobId,
    /// Deployment serving it.
    pub deployment_id: DeploymentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Model to run.
    pub model_id: String,
    /// Input serialized to JSON, at most [`MAX_INPUT_BYTES`] long.
    pub input_json: String,
    /// Schedule on GPU capacity.
    pub gpu: bool,
}

impl WorkUnitSpec {
    /// Build the spec for a dispatch request.
    #[must_use]
    pub fn from_request(req: &DispatchRequest<'_>) -> Self {
        Self {
            job_id: req.job_id,
            deployment_id: req.deployment_id,
            tenant_id: req.tenant_id,
            model_id: req.model_id.to_string(),
            input_json: truncate_utf8(req.input.to_string(), MAX_INPUT_BYTES),
            gpu: req.gpu,
        }
    }
}

fn truncate_utf8(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Platform-assigned name of a submitted unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitHandle(pub String);

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observed state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Accepted, not started.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with failure.
    Failed,
}

/// External orchestration platform (for example a cluster batch API).
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Submit a unit of work.
    async fn create_unit(&self, spec: &WorkUnitSpec) -> Result<UnitHandle, DispatchError>;
    /// Read the current state of a unit.
    async fn unit_state(&self, handle: &UnitHandle) -> Result<UnitState, DispatchError>;
}

/// Store the compute units write their results into.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Result for `job_id`, `None` when nothing was written.
    async fn fetch_result(&self, job_id: JobId) -> Result<Option<InferenceResult>, DispatchError>;
}

/// Poll-based backend over a [`ComputePlatform`] and a [`ResultStore`].
#[derive(Clone)]
pub struct OrchestratedBackend {
    platform: Arc<dyn ComputePlatform>,
    results: Arc<dyn ResultStore>,
    poll_interval: Duration,
    timeout: Duration,
}

impl OrchestratedBackend {
    /// Create a backend polling every `poll_interval` for at most `timeout`.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ComputePlatform>,
        results: Arc<dyn ResultStore>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            results,
            poll_interval,
            timeout,
        }
    }

    pub(crate) async fn run(&self, req: &DispatchRequest<'_>) -> Result<InferenceResult, DispatchError> {
        let spec = WorkUnitSpec::from_request(req);
        let handle = self.platform.create_unit(&spec).await?;
        debug!(job_id = %req.job_id, unit = %handle, "work unit created");

        self.wait_for_completion(&handle).await?;

        match self.results.fetch_result(req.job_id).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                warn!(job_id = %req.job_id, unit = %handle, "no result written, using fallback");
                Ok(InferenceResult::fallback())
            }
            Err(e) => {
                warn!(job_id = %req.job_id, error = %e, "result store read failed, using fallback");
                Ok(InferenceResult::fallback())
            }
        }
    }

    async fn wait_for_completion(&self, handle: &UnitHandle) -> Result<(), DispatchError> {
        // A timeout too large to represent as an instant never expires.
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            match self.platform.unit_state(handle).await? {
                UnitState::Succeeded => return Ok(()),
                UnitState::Failed => return Err(DispatchError::Failed("Job failed".into())),
                UnitState::Pending | UnitState::Running => {}
            }
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return Err(DispatchError::Timeout(self.timeout)),
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }
}

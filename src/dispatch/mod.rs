//! Compute dispatch: run one job on the configured backend and wait for it.
//!
//! Three strategies exist, chosen once when the dispatcher is built (see
//! [`crate::builders::build_dispatcher`]): an orchestration platform polled
//! for completion, a direct HTTP inference endpoint, or a local simulation.
//! A job is dispatched through exactly one of them and never retried across
//! strategies.

#[cfg(feature = "http-dispatch")]
pub mod http;
pub mod platform;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::core::{DeploymentId, DispatchError, JobId, TenantId};

#[cfg(feature = "http-dispatch")]
pub use http::HttpInferenceClient;
pub use platform::{
    result_key, ComputePlatform, OrchestratedBackend, ResultStore, UnitHandle, UnitState, WorkUnitSpec,
    MAX_INPUT_BYTES, RESULT_KEY_PREFIX,
};

/// Tokens billed when the backend does not report any.
pub const DEFAULT_TOKENS_USED: u64 = 100;
/// Compute seconds billed when the backend does not report any.
pub const DEFAULT_COMPUTE_SECONDS: f64 = 1.5;

fn default_output() -> Value {
    json!({ "result": "ok" })
}

const fn default_tokens() -> u64 {
    DEFAULT_TOKENS_USED
}

const fn default_seconds() -> f64 {
    DEFAULT_COMPUTE_SECONDS
}

/// Output and resource usage of one inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Model output.
    #[serde(rename = "output_data", default = "default_output")]
    pub output: Value,
    /// Tokens consumed.
    #[serde(default = "default_tokens")]
    pub tokens_used: u64,
    /// Wall time billed.
    #[serde(default = "default_seconds")]
    pub compute_seconds: f64,
}

impl InferenceResult {
    /// Result assumed when a unit succeeded but left nothing in the result store.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            output: default_output(),
            tokens_used: DEFAULT_TOKENS_USED,
            compute_seconds: DEFAULT_COMPUTE_SECONDS,
        }
    }

    /// Result of the simulated backend.
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            output: json!({ "result": "ok", "mock": true }),
            ..Self::fallback()
        }
    }
}

/// Everything a backend needs to run one job.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    /// Job being run.
    pub job_id: JobId,
    /// Deployment serving it.
    pub deployment_id: DeploymentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Model to run.
    pub model_id: &'a str,
    /// Admitted input payload.
    pub input: &'a Value,
    /// Schedule on GPU capacity.
    pub gpu: bool,
}

/// Execution strategy.
#[derive(Clone)]
pub enum DispatchStrategy {
    /// Create a unit of work on an orchestration platform and poll it.
    Orchestrated(OrchestratedBackend),
    /// Call an inference endpoint directly.
    #[cfg(feature = "http-dispatch")]
    Http(HttpInferenceClient),
    /// Sleep, then report success.
    Simulated {
        /// Simulated run time.
        delay: Duration,
    },
}

impl fmt::Debug for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl DispatchStrategy {
    /// Short strategy name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Orchestrated(_) => "orchestrated",
            #[cfg(feature = "http-dispatch")]
            Self::Http(_) => "http",
            Self::Simulated { .. } => "simulated",
        }
    }
}

/// Runs jobs on the configured compute backend.
#[derive(Debug, Clone)]
pub struct ComputeDispatcher {
    strategy: DispatchStrategy,
}

impl ComputeDispatcher {
    /// Wrap a strategy.
    #[must_use]
    pub const fn new(strategy: DispatchStrategy) -> Self {
        Self { strategy }
    }

    /// Orchestrated dispatcher over `platform` and `results`.
    #[must_use]
    pub fn orchestrated(
        platform: Arc<dyn ComputePlatform>,
        results: Arc<dyn ResultStore>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self::new(DispatchStrategy::Orchestrated(OrchestratedBackend::new(
            platform,
            results,
            poll_interval,
            timeout,
        )))
    }

    /// Simulated dispatcher.
    #[must_use]
    pub const fn simulated(delay: Duration) -> Self {
        Self::new(DispatchStrategy::Simulated { delay })
    }

    /// Active strategy.
    #[must_use]
    pub const fn strategy(&self) -> &DispatchStrategy {
        &self.strategy
    }

    /// Run one job to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] whose message is recorded on the job as is.
    pub async fn dispatch(&self, req: DispatchRequest<'_>) -> Result<InferenceResult, DispatchError> {
        debug!(job_id = %req.job_id, strategy = self.strategy.name(), "dispatching job");
        let result = match &self.strategy {
            DispatchStrategy::Orchestrated(backend) => backend.run(&req).await,
            #[cfg(feature = "http-dispatch")]
            DispatchStrategy::Http(client) => client.run(&req).await,
            DispatchStrategy::Simulated { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(InferenceResult::simulated())
            }
        }?;
        info!(
            job_id = %req.job_id,
            strategy = self.strategy.name(),
            tokens_used = result.tokens_used,
            compute_seconds = result.compute_seconds,
            "inference finished"
        );
        Ok(result)
    }
}

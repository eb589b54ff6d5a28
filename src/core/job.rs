//! Job, deployment and usage records handled by the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::OrchestratorError;
use crate::guardrails::GuardrailResult;
use crate::policy::PolicyAction;
use crate::util::clock::now_ms;

/// Job identifier.
pub type JobId = Uuid;
/// Tenant (account) identifier.
pub type TenantId = Uuid;
/// Deployment identifier.
pub type DeploymentId = Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the inference queue.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Finished and billed.
    Completed,
    /// Finished without output.
    Failed,
    /// Cancelled by an external signal.
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created, never provisioned.
    Pending,
    /// Provisioning in progress.
    Deploying,
    /// Runnable.
    Ready,
    /// Provisioning failed.
    Failed,
    /// Stopped by its owner.
    Stopped,
}

/// A configured, runnable model instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment identifier.
    pub id: DeploymentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Model served by this deployment.
    pub model_id: String,
    /// Free-form policy/guardrail configuration blob.
    #[serde(default)]
    pub config: Value,
    /// Provisioning status.
    pub status: DeploymentStatus,
}

/// Flag entry kept on the job for later review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// Rule that raised the flag.
    pub rule: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details from the rule.
    pub details: Value,
}

impl FlagRecord {
    /// Collect the flag results of a phase (or both phases).
    #[must_use]
    pub fn collect(results: &[GuardrailResult]) -> Vec<Self> {
        results
            .iter()
            .filter(|r| r.is_flag())
            .map(|r| Self {
                rule: r.rule_name.clone(),
                message: r.message.clone(),
                details: r.details.clone(),
            })
            .collect()
    }
}

/// One inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target deployment.
    pub deployment_id: DeploymentId,
    /// Request payload.
    pub input: Value,
    /// Inference output, only kept for completed jobs.
    pub output: Option<Value>,
    /// Current status.
    pub status: JobStatus,
    /// Failure cause.
    pub error_message: Option<String>,
    /// Tokens reported by the compute backend.
    pub tokens_used: Option<u64>,
    /// CPU seconds consumed (zero for GPU deployments).
    pub compute_seconds: Option<f64>,
    /// GPU seconds consumed (zero for CPU deployments).
    pub gpu_seconds: Option<f64>,
    /// Whether any guardrail resolved to block.
    pub guardrail_blocked: bool,
    /// Flags raised across both phases.
    pub guardrail_flags: Vec<FlagRecord>,
    /// Input-phase score.
    pub score_input: Option<f64>,
    /// Output-phase score.
    pub score_output: Option<f64>,
    /// Combined score used for the policy decision.
    pub score_final: Option<f64>,
    /// Policy decision.
    pub policy_action: Option<PolicyAction>,
    /// Completed but logged for review.
    pub flagged_for_review: bool,
    /// Retry hint when rejected by the block-rate limiter.
    pub retry_after_seconds: Option<u64>,
    /// Creation timestamp (ms since epoch).
    pub created_at_ms: u128,
    /// Terminal transition timestamp (ms since epoch).
    pub completed_at_ms: Option<u128>,
}

impl Job {
    /// Create a freshly queued job.
    #[must_use]
    pub fn queued(tenant_id: TenantId, deployment_id: DeploymentId, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            deployment_id,
            input,
            output: None,
            status: JobStatus::Queued,
            error_message: None,
            tokens_used: None,
            compute_seconds: None,
            gpu_seconds: None,
            guardrail_blocked: false,
            guardrail_flags: Vec::new(),
            score_input: None,
            score_output: None,
            score_final: None,
            policy_action: None,
            flagged_for_review: false,
            retry_after_seconds: None,
            created_at_ms: now_ms(),
            completed_at_ms: None,
        }
    }

    /// Move to `failed`, dropping any output.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.into());
        self.output = None;
        self.completed_at_ms = Some(now_ms());
    }

    /// Move to `completed`.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.error_message = None;
        self.completed_at_ms = Some(now_ms());
    }
}

/// Append-only billing entry for one completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Billed tenant.
    pub tenant_id: TenantId,
    /// Completed job.
    pub job_id: JobId,
    /// Tokens used.
    pub tokens_used: u64,
    /// CPU seconds.
    pub compute_seconds: f64,
    /// GPU seconds.
    pub gpu_seconds: f64,
    /// Creation timestamp (ms since epoch).
    pub created_at_ms: u128,
}

impl UsageRecord {
    /// Attribute `seconds` to GPU or CPU time depending on the deployment.
    #[must_use]
    pub fn for_job(job: &Job, tokens_used: u64, seconds: f64, gpu: bool) -> Self {
        let (compute_seconds, gpu_seconds) = if gpu { (0.0, seconds) } else { (seconds, 0.0) };
        Self {
            tenant_id: job.tenant_id,
            job_id: job.id,
            tokens_used,
            compute_seconds,
            gpu_seconds,
            created_at_ms: now_ms(),
        }
    }
}

/// Message pushed to the inference queue by the admission API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Job identifier.
    pub job_id: JobId,
    /// Target deployment.
    pub deployment_id: DeploymentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Request payload.
    #[serde(default)]
    pub input: Value,
}

#[derive(Deserialize)]
struct RawQueueMessage {
    job_id: Option<String>,
    deployment_id: Option<String>,
    #[serde(alias = "user_id")]
    tenant_id: Option<String>,
    #[serde(default)]
    input: Value,
}

fn parse_id(field: &str, value: Option<String>) -> Result<Uuid, OrchestratorError> {
    let raw = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::Validation(format!("missing {field}")))?;
    Uuid::parse_str(&raw)
        .map_err(|e| OrchestratorError::Validation(format!("{field} `{raw}`: {e}")))
}

impl QueueMessage {
    /// Parse and validate a raw queue message.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] when the message is not JSON
    /// or lacks one of the job, deployment or tenant identifiers.
    pub fn parse(raw: &str) -> Result<Self, OrchestratorError> {
        let msg: RawQueueMessage = serde_json::from_str(raw)
            .map_err(|e| OrchestratorError::Validation(e.to_string()))?;
        Ok(Self {
            job_id: parse_id("job_id", msg.job_id)?,
            deployment_id: parse_id("deployment_id", msg.deployment_id)?,
            tenant_id: parse_id("tenant_id", msg.tenant_id)?,
            input: msg.input,
        })
    }

    /// Build the message for a job.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            deployment_id: job.deployment_id,
            tenant_id: job.tenant_id,
            input: job.input.clone(),
        }
    }

    /// Serialize to the wire format.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "job_id": self.job_id,
            "deployment_id": self.deployment_id,
            "tenant_id": self.tenant_id,
            "input": self.input,
        })
        .to_string()
    }
}

//! Job orchestration worker.
//!
//! A worker is a single logical consumer: it pops one message at a time from
//! the shared queue and drives that job to a terminal status before popping
//! the next one. Scale out by running more workers against the same queue.
//!
//! Nothing that happens while processing a job escapes the worker. Errors and
//! panics are converted into a failed job and the loop moves on.

mod pipeline;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorSettings;
use crate::core::{
    DeploymentStore, JobId, JobQueue, JobStatus, JobStore, OrchestratorError, QueueMessage, StoreError, TenantId,
};
use crate::dispatch::ComputeDispatcher;
use crate::guardrails::{BlockRateLimiter, GuardrailRunner};
use crate::util::metrics::Metrics;

/// Capacity of the event channel; slow subscribers miss the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications published by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The tenant's first usage record was written.
    FirstCompletion {
        /// Tenant billed for the first time.
        tenant_id: TenantId,
        /// Job that produced the record.
        job_id: JobId,
    },
    /// The worker moved a job to a terminal status.
    JobFinished {
        /// Finished job.
        job_id: JobId,
        /// Terminal status.
        status: JobStatus,
    },
}

/// What happened to one dequeued message.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Job completed and usage was recorded.
    Completed {
        /// Completed job.
        job_id: JobId,
        /// Completed but kept for review.
        flagged_for_review: bool,
    },
    /// Job failed; `reason` is its stored error message.
    Failed {
        /// Failed job.
        job_id: JobId,
        /// Stored error message.
        reason: String,
    },
    /// Message discarded without touching any job.
    Dropped {
        /// Why the message was discarded.
        reason: String,
    },
    /// Another actor moved the job first (for example an external cancel).
    Superseded {
        /// Affected job.
        job_id: JobId,
        /// Status found in the store.
        status: JobStatus,
    },
}

impl JobOutcome {
    /// Metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Dropped { .. } => "dropped",
            Self::Superseded { .. } => "superseded",
        }
    }
}

/// Pulls jobs from the queue and runs each through admission, dispatch,
/// output admission and billing.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    jobs: Arc<dyn JobStore>,
    deployments: Arc<dyn DeploymentStore>,
    limiter: BlockRateLimiter,
    runner: GuardrailRunner,
    dispatcher: ComputeDispatcher,
    settings: OrchestratorSettings,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<WorkerEvent>,
}

impl std::fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorker")
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Shared handles a worker is assembled from.
pub struct WorkerParts {
    /// Inference queue.
    pub queue: Arc<dyn JobQueue>,
    /// Job store.
    pub jobs: Arc<dyn JobStore>,
    /// Deployment store.
    pub deployments: Arc<dyn DeploymentStore>,
    /// Block-rate limiter.
    pub limiter: BlockRateLimiter,
    /// Guardrail runner.
    pub runner: GuardrailRunner,
    /// Compute dispatcher.
    pub dispatcher: ComputeDispatcher,
    /// Settings.
    pub settings: OrchestratorSettings,
    /// Metrics registry.
    pub metrics: Arc<Metrics>,
}

impl JobWorker {
    /// Assemble a worker. Prefer [`crate::builders::WorkerBuilder`].
    #[must_use]
    pub fn from_parts(parts: WorkerParts) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue: parts.queue,
            jobs: parts.jobs,
            deployments: parts.deployments,
            limiter: parts.limiter,
            runner: parts.runner,
            dispatcher: parts.dispatcher,
            settings: parts.settings,
            metrics: parts.metrics,
            events,
        }
    }

    /// Subscribe to worker events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Metrics registry this worker records into.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Consume the queue until `shutdown` is cancelled.
    ///
    /// The token is only observed between jobs and during the pause after a
    /// queue failure; a job that has been popped always runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(strategy = self.dispatcher.strategy().name(), "worker started");
        while !shutdown.is_cancelled() {
            self.refresh_queue_depth().await;
            match self.queue.pop(self.settings.queue_poll_timeout()).await {
                Ok(Some(raw)) => {
                    self.process_message(&raw).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "queue pop failed, backing off");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.settings.queue_error_backoff()) => {}
                    }
                }
            }
        }
        info!("worker stopped");
    }

    /// Process one raw queue message end to end.
    pub async fn process_message(&self, raw: &str) -> JobOutcome {
        let msg = match QueueMessage::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                error!(error = %e, "dropping invalid queue message");
                return self.record(JobOutcome::Dropped { reason: e.to_string() });
            }
        };
        let job_id = msg.job_id;

        let outcome = match AssertUnwindSafe(self.process_job(&msg)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(OrchestratorError::Store(StoreError::Conflict { actual, .. }))) => {
                info!(%job_id, status = %actual, "job changed underneath the worker, leaving it");
                JobOutcome::Superseded { job_id, status: actual }
            }
            Ok(Err(e)) => self.force_fail(job_id, &e).await,
            Err(panic) => {
                let e = OrchestratorError::Panic(panic_message(panic.as_ref()));
                self.force_fail(job_id, &e).await
            }
        };
        self.record(outcome)
    }

    fn record(&self, outcome: JobOutcome) -> JobOutcome {
        self.metrics.jobs.inc(&[("status", outcome.label())]);
        outcome
    }

    fn publish(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }

    async fn refresh_queue_depth(&self) {
        match self.queue.len().await {
            Ok(depth) => self
                .metrics
                .queue_depth
                .set(i64::try_from(depth).unwrap_or(i64::MAX)),
            Err(e) => debug!(error = %e, "queue depth unavailable"),
        }
    }

    /// Last-resort transition to `failed` after an unexpected error.
    async fn force_fail(&self, job_id: JobId, cause: &OrchestratorError) -> JobOutcome {
        error!(%job_id, error = %cause, "job processing failed unexpectedly");
        let reason = cause.to_string();
        let mut job = match self.jobs.load(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return JobOutcome::Dropped { reason },
            Err(e) => {
                error!(%job_id, error = %e, "could not load job to mark it failed");
                return JobOutcome::Failed { job_id, reason };
            }
        };
        if job.status.is_terminal() {
            return JobOutcome::Superseded { job_id, status: job.status };
        }

        let expected = job.status;
        job.fail(reason.clone());
        match self.jobs.save(&job, expected).await {
            Ok(()) => {
                self.publish(WorkerEvent::JobFinished { job_id, status: JobStatus::Failed });
                JobOutcome::Failed { job_id, reason }
            }
            Err(StoreError::Conflict { actual, .. }) => JobOutcome::Superseded { job_id, status: actual },
            Err(e) => {
                warn!(%job_id, error = %e, "could not persist failed status");
                JobOutcome::Failed { job_id, reason }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

//! Per-job state machine: `queued -> running -> completed | failed`.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::DeploymentPolicy;
use crate::core::{
    Deployment, DeploymentStatus, FlagRecord, Job, JobStatus, OrchestratorError, QueueMessage, StoreError,
    UsageRecord,
};
use crate::dispatch::DispatchRequest;
use crate::guardrails::{GuardrailOutcome, GuardrailResult, Phase};
use crate::policy::{evaluate, score, PolicyAction};
use crate::worker::{JobOutcome, JobWorker, WorkerEvent};

/// Attempts made to commit a completion and its usage record before the job
/// is failed instead.
const USAGE_APPEND_ATTEMPTS: u32 = 3;
const USAGE_RETRY_DELAY: Duration = Duration::from_millis(100);

impl JobWorker {
    pub(super) async fn process_job(&self, msg: &QueueMessage) -> Result<JobOutcome, OrchestratorError> {
        let Some(mut job) = self.jobs.load(msg.job_id).await? else {
            info!(job_id = %msg.job_id, "job no longer exists, dropping message");
            return Ok(JobOutcome::Dropped { reason: format!("job {} not found", msg.job_id) });
        };
        if job.status != JobStatus::Queued {
            info!(job_id = %job.id, status = %job.status, "job is not queued, dropping message");
            return Ok(JobOutcome::Dropped { reason: format!("job {} is {}", job.id, job.status) });
        }
        if msg.tenant_id != job.tenant_id || msg.deployment_id != job.deployment_id {
            warn!(job_id = %job.id, "queue message disagrees with stored job, using stored job");
        }

        let Some(deployment) = self.deployments.load(job.deployment_id).await? else {
            let reason = format!("deployment {} not found", job.deployment_id);
            return self.finish_failed(job, JobStatus::Queued, reason).await;
        };

        job.status = JobStatus::Running;
        self.jobs.save(&job, JobStatus::Queued).await?;
        info!(job_id = %job.id, tenant_id = %job.tenant_id, deployment_id = %deployment.id, "job running");

        self.ensure_ready(&deployment).await?;

        let policy = DeploymentPolicy::resolve(&deployment.config, &self.settings, self.runner.rules())?;
        for warning in &policy.warnings {
            warn!(job_id = %job.id, deployment_id = %deployment.id, %warning, "deployment config warning");
        }

        let rate = self
            .limiter
            .check(job.tenant_id, job.deployment_id, policy.block_max, policy.block_window)
            .await;
        if !rate.within_limit {
            job.retry_after_seconds = Some(rate.retry_after_seconds);
            let reason = format!("too many blocked requests, retry after {}s", rate.retry_after_seconds);
            return self.finish_failed(job, JobStatus::Running, reason).await;
        }

        let opts = policy.guardrail_options();
        let input = self.runner.run(&job.input, Phase::Input, &opts).await;
        job.score_input = Some(score(&input.results));
        job.guardrail_flags = FlagRecord::collect(&input.results);
        if !input.passed {
            return self.reject(job, &policy, &input, "input blocked by guardrails").await;
        }

        let request = DispatchRequest {
            job_id: job.id,
            deployment_id: job.deployment_id,
            tenant_id: job.tenant_id,
            model_id: &deployment.model_id,
            input: &job.input,
            gpu: policy.gpu,
        };
        let result = match self.dispatcher.dispatch(request).await {
            Ok(result) => result,
            Err(e) => return self.finish_failed(job, JobStatus::Running, e.to_string()).await,
        };
        let (compute_seconds, gpu_seconds) = split_seconds(result.compute_seconds, policy.gpu);
        job.tokens_used = Some(result.tokens_used);
        job.compute_seconds = Some(compute_seconds);
        job.gpu_seconds = Some(gpu_seconds);

        let output = self.runner.run(&result.output, Phase::Output, &opts).await;
        job.score_output = Some(score(&output.results));
        job.guardrail_flags.extend(FlagRecord::collect(&output.results));
        if !output.passed {
            return self.reject(job, &policy, &output, "output blocked by guardrails").await;
        }

        let combined: Vec<GuardrailResult> = input.results.into_iter().chain(output.results).collect();
        let final_score = score(&combined);
        job.score_final = Some(final_score);
        let decision = evaluate(final_score, &policy.thresholds);
        job.policy_action = Some(decision.action);
        match decision.action {
            PolicyAction::Block => {
                let (tenant_id, deployment_id) = (job.tenant_id, job.deployment_id);
                let failed = self.finish_failed(job, JobStatus::Running, decision.reason).await?;
                self.limiter.increment(tenant_id, deployment_id, policy.block_window).await;
                return Ok(failed);
            }
            PolicyAction::Log => {
                job.flagged_for_review = true;
                warn!(job_id = %job.id, reason = %decision.reason, "job logged for review");
            }
            PolicyAction::Allow => {}
        }

        job.output = Some(result.output);
        job.complete();
        let record = UsageRecord::for_job(&job, result.tokens_used, result.compute_seconds, policy.gpu);
        match self.commit_completion(&job, record).await {
            Ok(()) => {}
            Err(StoreError::Unavailable(e)) => {
                error!(job_id = %job.id, error = %e, "usage could not be recorded, failing job");
                let reason = format!("usage could not be recorded: {e}");
                return self.finish_failed(job, JobStatus::Running, reason).await;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            job_id = %job.id,
            score = final_score,
            policy_action = %decision.action,
            tokens_used = result.tokens_used,
            "job completed"
        );
        self.publish(WorkerEvent::JobFinished { job_id: job.id, status: JobStatus::Completed });
        Ok(JobOutcome::Completed {
            job_id: job.id,
            flagged_for_review: job.flagged_for_review,
        })
    }

    /// Walk a pending deployment through `deploying` to `ready`.
    async fn ensure_ready(&self, deployment: &Deployment) -> Result<(), StoreError> {
        if deployment.status != DeploymentStatus::Pending {
            return Ok(());
        }
        self.deployments
            .set_status(deployment.id, DeploymentStatus::Deploying)
            .await?;
        self.deployments.set_status(deployment.id, DeploymentStatus::Ready).await?;
        info!(deployment_id = %deployment.id, "deployment provisioned");
        Ok(())
    }

    /// Fail a job on a guardrail block and count the block once the failed
    /// status is stored.
    async fn reject(
        &self,
        mut job: Job,
        policy: &DeploymentPolicy,
        outcome: &GuardrailOutcome,
        fallback: &str,
    ) -> Result<JobOutcome, OrchestratorError> {
        job.guardrail_blocked = true;
        job.policy_action = Some(PolicyAction::Block);
        let reason = outcome
            .first_block()
            .map_or_else(|| fallback.to_string(), |r| r.message.clone());
        let (job_id, tenant_id, deployment_id) = (job.id, job.tenant_id, job.deployment_id);
        let failed = self.finish_failed(job, JobStatus::Running, reason).await?;
        let count = self.limiter.increment(tenant_id, deployment_id, policy.block_window).await;
        info!(%job_id, blocks_in_window = count, "job blocked by guardrails");
        Ok(failed)
    }

    async fn finish_failed(
        &self,
        mut job: Job,
        expected: JobStatus,
        reason: String,
    ) -> Result<JobOutcome, OrchestratorError> {
        job.fail(reason.clone());
        self.jobs.save(&job, expected).await?;
        info!(job_id = %job.id, %reason, "job failed");
        self.publish(WorkerEvent::JobFinished { job_id: job.id, status: JobStatus::Failed });
        Ok(JobOutcome::Failed { job_id: job.id, reason })
    }

    /// Store the completed job together with its usage record, retrying a
    /// backend that is unavailable.
    async fn commit_completion(&self, job: &Job, record: UsageRecord) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.jobs.complete(job, JobStatus::Running, record.clone()).await {
                Ok(receipt) => {
                    if receipt.first_for_tenant {
                        self.publish(WorkerEvent::FirstCompletion { tenant_id: job.tenant_id, job_id: job.id });
                    }
                    return Ok(());
                }
                Err(StoreError::Unavailable(e)) if attempt < USAGE_APPEND_ATTEMPTS => {
                    warn!(job_id = %job.id, attempt, error = %e, "usage append failed, retrying");
                    tokio::time::sleep(USAGE_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

const fn split_seconds(seconds: f64, gpu: bool) -> (f64, f64) {
    if gpu {
        (0.0, seconds)
    } else {
        (seconds, 0.0)
    }
}

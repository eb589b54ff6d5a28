//! Worker assembly.

use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::config::OrchestratorSettings;
use crate::core::{AppResult, CounterStore, DeploymentStore, JobQueue, JobStore};
use crate::dispatch::ComputeDispatcher;
use crate::guardrails::{BlockRateLimiter, GuardrailRunner, RuleSet};
use crate::util::metrics::Metrics;
use crate::worker::{JobWorker, WorkerParts};

/// Collects the shared handles a [`JobWorker`] needs.
///
/// Queue, job store, deployment store and counter store are required; the
/// job store also records usage. The rule set defaults to the built-in
/// rules, metrics to a fresh registry and the dispatcher to
/// [`crate::builders::build_dispatcher`] without a platform.
#[derive(Default)]
pub struct WorkerBuilder {
    settings: OrchestratorSettings,
    queue: Option<Arc<dyn JobQueue>>,
    jobs: Option<Arc<dyn JobStore>>,
    deployments: Option<Arc<dyn DeploymentStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    dispatcher: Option<ComputeDispatcher>,
    rules: Option<Arc<RuleSet>>,
    metrics: Option<Arc<Metrics>>,
}

impl WorkerBuilder {
    /// Start from `settings`.
    #[must_use]
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Inference queue.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Job store.
    #[must_use]
    pub fn jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Deployment store.
    #[must_use]
    pub fn deployments(mut self, deployments: Arc<dyn DeploymentStore>) -> Self {
        self.deployments = Some(deployments);
        self
    }

    /// Counter store for block-rate limiting.
    #[must_use]
    pub fn counters(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Compute dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: ComputeDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Guardrail rules.
    #[must_use]
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(Arc::new(rules));
        self
    }

    /// Metrics registry.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate settings and assemble the worker.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, a missing required handle, or a dispatcher
    /// that cannot be built.
    pub fn build(self) -> AppResult<JobWorker> {
        self.settings.validate().context("invalid orchestrator settings")?;
        let dispatcher = match self.dispatcher {
            Some(d) => d,
            None => crate::builders::build_dispatcher(&self.settings, None)?,
        };
        let metrics = self.metrics.unwrap_or_default();
        let rules = self.rules.unwrap_or_default();
        let counters = self.counters.ok_or_else(|| anyhow!("counter store is required"))?;

        Ok(JobWorker::from_parts(WorkerParts {
            queue: self.queue.ok_or_else(|| anyhow!("job queue is required"))?,
            jobs: self.jobs.ok_or_else(|| anyhow!("job store is required"))?,
            deployments: self.deployments.ok_or_else(|| anyhow!("deployment store is required"))?,
            limiter: BlockRateLimiter::new(counters),
            runner: GuardrailRunner::new(rules, Arc::clone(&metrics)),
            dispatcher,
            settings: self.settings,
            metrics,
        }))
    }
}

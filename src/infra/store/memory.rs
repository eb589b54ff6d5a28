//! In-memory job, deployment, usage and result stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{
    AppendReceipt, Deployment, DeploymentId, DeploymentStatus, DeploymentStore, Job, JobId, JobStatus, JobStore,
    DispatchError, StoreError, UsageRecord,
};
use crate::dispatch::{result_key, InferenceResult, ResultStore};

/// Job store keyed by id with conditional writes.
///
/// Owns the usage ledger so a completion and its usage record commit together.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    ledger: Arc<InMemoryUsageLedger>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job unconditionally (admission path).
    pub fn insert(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// Snapshot of a job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Usage ledger written by [`JobStore::complete`].
    #[must_use]
    pub fn ledger(&self) -> &Arc<InMemoryUsageLedger> {
        &self.ledger
    }

    /// Cancel a job that has not reached a terminal status yet.
    /// Returns `false` when the job is unknown or already terminal.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.completed_at_ms = Some(crate::util::clock::now_ms());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.get(id))
    }

    async fn save(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        *checked_slot(&mut jobs, job.id, expected)? = job.clone();
        Ok(())
    }

    async fn complete(&self, job: &Job, expected: JobStatus, usage: UsageRecord) -> Result<AppendReceipt, StoreError> {
        // The job lock is held across the append so neither write is visible alone.
        let mut jobs = self.jobs.write();
        let stored = checked_slot(&mut jobs, job.id, expected)?;
        let receipt = self.ledger.append(usage)?;
        *stored = job.clone();
        Ok(receipt)
    }
}

fn checked_slot(jobs: &mut HashMap<JobId, Job>, id: JobId, expected: JobStatus) -> Result<&mut Job, StoreError> {
    let stored = jobs
        .get_mut(&id)
        .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
    if stored.status != expected {
        return Err(StoreError::Conflict {
            job_id: id,
            expected,
            actual: stored.status,
        });
    }
    Ok(stored)
}

/// Deployment store that keeps every status transition for inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentStore {
    deployments: RwLock<HashMap<DeploymentId, Deployment>>,
    history: RwLock<HashMap<DeploymentId, Vec<DeploymentStatus>>>,
}

impl InMemoryDeploymentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a deployment.
    pub fn insert(&self, deployment: Deployment) {
        self.deployments.write().insert(deployment.id, deployment);
    }

    /// Snapshot of a deployment.
    #[must_use]
    pub fn get(&self, id: DeploymentId) -> Option<Deployment> {
        self.deployments.read().get(&id).cloned()
    }

    /// Statuses written through [`DeploymentStore::set_status`], oldest first.
    #[must_use]
    pub fn status_history(&self, id: DeploymentId) -> Vec<DeploymentStatus> {
        self.history.read().get(&id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn load(&self, id: DeploymentId) -> Result<Option<Deployment>, StoreError> {
        Ok(self.get(id))
    }

    async fn set_status(&self, id: DeploymentId, status: DeploymentStatus) -> Result<(), StoreError> {
        let mut deployments = self.deployments.write();
        let deployment = deployments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment {id}")))?;
        deployment.status = status;
        self.history.write().entry(id).or_default().push(status);
        Ok(())
    }
}

/// Append-only usage ledger, unique per job. Written only through
/// [`InMemoryJobStore`]'s completion path.
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    records: RwLock<Vec<UsageRecord>>,
    failures: AtomicU32,
}

impl InMemoryUsageLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with [`StoreError::Unavailable`].
    /// A failed append leaves the job it belongs to untouched.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// All records, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.read().clone()
    }

    /// Records for one job; at most one by construction.
    #[must_use]
    pub fn records_for(&self, job_id: JobId) -> Vec<UsageRecord> {
        self.records.read().iter().filter(|r| r.job_id == job_id).cloned().collect()
    }

    fn append(&self, record: UsageRecord) -> Result<AppendReceipt, StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("usage ledger write failed".into()));
        }

        let mut records = self.records.write();
        if records.iter().any(|r| r.job_id == record.job_id) {
            return Err(StoreError::Duplicate(record.job_id));
        }
        let first_for_tenant = !records.iter().any(|r| r.tenant_id == record.tenant_id);
        records.push(record);
        Ok(AppendReceipt { first_for_tenant })
    }
}

/// Result store keyed like the shared cache compute units write into.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, InferenceResult>>,
}

impl InMemoryResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for `job_id`, as a compute unit would.
    pub fn put(&self, job_id: JobId, result: InferenceResult) {
        self.results.write().insert(result_key(job_id), result);
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn fetch_result(&self, job_id: JobId) -> Result<Option<InferenceResult>, DispatchError> {
        Ok(self.results.read().get(&result_key(job_id)).cloned())
    }
}

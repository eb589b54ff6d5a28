//! # Prometheus Orchestrator
//!
//! Job orchestration and safety-policy pipeline for a multi-tenant inference
//! platform.
//!
//! A [`worker::JobWorker`] pulls queued inference requests, admits them
//! through concurrent guardrail rules, a block-rate limiter and a scored
//! policy, dispatches admitted work to a compute backend, checks the output
//! the same way and records exactly one usage entry per completed job.
//! Downstream failures degrade to a failed job, never to a crashed worker.
//!
//! ## Key Features
//!
//! - **Concurrent guardrails**: every rule of a phase runs on its own blocking
//!   task under one deadline, with fail-open or fail-closed handling
//! - **Block-rate limiting**: fixed-window counters per tenant and deployment,
//!   failing open when the counter store is down
//! - **Scored policy**: flags lower the score; thresholds map it to allow,
//!   log for review, or block
//! - **Pluggable compute**: orchestration platform polling, direct HTTP, or
//!   a simulated backend
//! - **At-most-once billing**: a completion and its usage record commit
//!   together, and the ledger is keyed by job
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_orchestrator::builders::WorkerBuilder;
//! use prometheus_orchestrator::config::OrchestratorSettings;
//! use prometheus_orchestrator::infra::*;
//! use tokio_util::sync::CancellationToken;
//!
//! let worker = WorkerBuilder::new(OrchestratorSettings::from_env()?)
//!     .queue(Arc::new(InMemoryJobQueue::new()))
//!     .jobs(Arc::new(InMemoryJobStore::new()))
//!     .deployments(Arc::new(InMemoryDeploymentStore::new()))
//!     .counters(Arc::new(InMemoryCounterStore::new()))
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! worker.run(shutdown.child_token()).await;
//! ```
//!
//! For complete scenarios, see `tests/worker_pipeline_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core records, errors and storage abstractions.
pub mod core;
/// Process settings and per-deployment policy.
pub mod config;
/// Builders that assemble dispatchers and workers.
pub mod builders;
/// Content rules, the concurrent runner and block-rate limiting.
pub mod guardrails;
/// Admission scoring and policy decisions.
pub mod policy;
/// Compute backends.
pub mod dispatch;
/// In-memory queue and store backends.
pub mod infra;
/// The job orchestration worker.
pub mod worker;
/// Shared utilities.
pub mod util;

//! Configuration models: process settings and per-deployment policy.

pub mod deployment;
pub mod settings;

pub use deployment::DeploymentPolicy;
pub use settings::{OrchestratorSettings, ENV_PREFIX, MAX_GUARDRAIL_TIMEOUT, MAX_WAIT};

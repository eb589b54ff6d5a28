//! Job, deployment and usage store backends.

pub mod memory;

pub use memory::{InMemoryDeploymentStore, InMemoryJobStore, InMemoryResultStore, InMemoryUsageLedger};

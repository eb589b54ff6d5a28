//! Infrastructure adapters for queues, stores and counters.
//!
//! Only in-memory backends ship here; production backends implement the
//! traits in [`crate::core::store`] and [`crate::dispatch`].

pub mod counter;
pub mod queue;
pub mod store;

pub use counter::InMemoryCounterStore;
pub use queue::InMemoryJobQueue;
pub use store::{InMemoryDeploymentStore, InMemoryJobStore, InMemoryResultStore, InMemoryUsageLedger};

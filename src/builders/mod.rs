//! Builders that assemble dispatchers and workers from settings.

pub mod dispatcher;
pub mod worker_builder;

pub use dispatcher::{build_dispatcher, PlatformBackend};
pub use worker_builder::WorkerBuilder;

//! Counter store backends for block-rate limiting.

pub mod memory;

pub use memory::InMemoryCounterStore;

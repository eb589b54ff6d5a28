//! Admission scoring and the score-to-action policy.

pub mod evaluator;
pub mod scorer;

pub use evaluator::{evaluate, PolicyAction, PolicyDecision, PolicyThresholds};
pub use scorer::{score, FLAG_PENALTY};

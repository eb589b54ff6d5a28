//! Map an admission score to allow, log or block.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default block threshold.
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.3;
/// Default log threshold.
pub const DEFAULT_LOG_THRESHOLD: f64 = 0.7;

/// Action chosen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Admit.
    Allow,
    /// Admit, but keep for review.
    Log,
    /// Reject.
    Block,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Log => "log",
            Self::Block => "block",
        })
    }
}

/// Tenant-configurable thresholds; `block_threshold <= log_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    /// Scores strictly below this block.
    pub block_threshold: f64,
    /// Scores strictly below this (and not blocked) are logged.
    pub log_threshold: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            log_threshold: DEFAULT_LOG_THRESHOLD,
        }
    }
}

impl PolicyThresholds {
    /// Build thresholds.
    #[must_use]
    pub const fn new(block_threshold: f64, log_threshold: f64) -> Self {
        Self { block_threshold, log_threshold }
    }

    /// Configuration warning when the thresholds are inverted. They are used
    /// as configured; nothing is swapped.
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        (self.block_threshold > self.log_threshold).then(|| {
            format!(
                "policy block_threshold {} is above log_threshold {}",
                self.block_threshold, self.log_threshold
            )
        })
    }
}

/// Action plus a human-readable reason (empty for allow).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Chosen action.
    pub action: PolicyAction,
    /// Why; empty when allowed.
    pub reason: String,
}

/// Evaluate `score` against `thresholds`.
#[must_use]
pub fn evaluate(score: f64, thresholds: &PolicyThresholds) -> PolicyDecision {
    if score < thresholds.block_threshold {
        return PolicyDecision {
            action: PolicyAction::Block,
            reason: format!(
                "Score {score:.2} below block threshold {}",
                thresholds.block_threshold
            ),
        };
    }
    if score < thresholds.log_threshold {
        warn!(
            score,
            log_threshold = thresholds.log_threshold,
            "policy: logging request below log threshold"
        );
        return PolicyDecision {
            action: PolicyAction::Log,
            reason: format!("Score {score:.2} below log threshold {}", thresholds.log_threshold),
        };
    }
    PolicyDecision {
        action: PolicyAction::Allow,
        reason: String::new(),
    }
}

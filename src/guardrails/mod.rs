//! Guardrails: content rules, the concurrent runner and block-rate limiting.

pub mod block_rate;
pub mod rules;
pub mod runner;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use block_rate::{BlockRateLimiter, BlockRateStatus, DEFAULT_RETRY_AFTER_SECONDS};
pub use rules::{extract_text, Rule, RuleCheck, RuleSet};
pub use runner::{GuardrailOptions, GuardrailOutcome, GuardrailRunner};

/// Action resolved by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    /// Nothing found.
    Allow,
    /// Log but allow.
    Flag,
    /// Reject the request.
    Block,
}

impl GuardrailAction {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Flag => "flag",
            Self::Block => "block",
        }
    }
}

/// Admission phase being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Request payload, before dispatch.
    Input,
    /// Inference output, after dispatch.
    Output,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// Phases a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    /// Input only.
    Input,
    /// Output only.
    Output,
    /// Both phases.
    Both,
}

impl RulePhase {
    /// Whether a rule tagged with this phase runs during `phase`.
    #[must_use]
    pub const fn applies_to(self, phase: Phase) -> bool {
        matches!(
            (self, phase),
            (Self::Both, _) | (Self::Input, Phase::Input) | (Self::Output, Phase::Output)
        )
    }
}

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// `false` whenever the rule found something.
    pub passed: bool,
    /// Resolved action.
    pub action: GuardrailAction,
    /// Rule name.
    pub rule_name: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub details: Value,
}

impl GuardrailResult {
    /// Clean result.
    #[must_use]
    pub fn allow(rule_name: impl Into<String>) -> Self {
        Self {
            passed: true,
            action: GuardrailAction::Allow,
            rule_name: rule_name.into(),
            message: String::new(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Flagged result.
    #[must_use]
    pub fn flag(rule_name: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            passed: false,
            action: GuardrailAction::Flag,
            rule_name: rule_name.into(),
            message: message.into(),
            details,
        }
    }

    /// Blocking result.
    #[must_use]
    pub fn block(rule_name: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            passed: false,
            action: GuardrailAction::Block,
            rule_name: rule_name.into(),
            message: message.into(),
            details,
        }
    }

    /// Action is `flag`.
    #[must_use]
    pub fn is_flag(&self) -> bool {
        self.action == GuardrailAction::Flag
    }

    /// Action is `block`.
    #[must_use]
    pub fn is_block(&self) -> bool {
        self.action == GuardrailAction::Block
    }
}

//! Concurrent guardrail evaluation under a shared deadline.
//!
//! Every enabled rule for the phase runs on its own blocking task. The runner
//! waits for the whole set or the deadline, whichever comes first; a rule that
//! is still running at the deadline is abandoned and the phase resolves
//! according to the deployment's fail-open setting.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, warn};

use crate::core::RuleError;
use crate::guardrails::{GuardrailAction, GuardrailResult, Phase, Rule, RuleSet};
use crate::util::metrics::Metrics;

/// Rule name reported when the deadline elapses on a fail-closed phase.
pub const TIMEOUT_RULE: &str = "timeout";
/// Rule name reported when a rule fails on a fail-closed phase.
pub const ERROR_RULE: &str = "error";

/// Per-call guardrail settings derived from the deployment configuration.
#[derive(Debug, Clone)]
pub struct GuardrailOptions {
    /// Enabled rule names; `None` enables every rule in the set.
    pub enabled_rules: Option<BTreeSet<String>>,
    /// Per-rule action upgrades.
    pub overrides: HashMap<String, GuardrailAction>,
    /// Deadline shared by all rules of a phase.
    pub timeout: Duration,
    /// Allow on error/timeout when `true`, block when `false`.
    pub fail_open: bool,
}

impl Default for GuardrailOptions {
    fn default() -> Self {
        Self {
            enabled_rules: None,
            overrides: HashMap::new(),
            timeout: Duration::from_secs(5),
            fail_open: true,
        }
    }
}

impl GuardrailOptions {
    /// Restrict evaluation to the named rules.
    #[must_use]
    pub fn with_enabled_rules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_rules = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Upgrade a rule's effective action.
    #[must_use]
    pub fn with_override(mut self, rule: impl Into<String>, action: GuardrailAction) -> Self {
        self.overrides.insert(rule.into(), action);
        self
    }

    /// Set the phase deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the fail-open flag.
    #[must_use]
    pub const fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled_rules.as_ref().is_none_or(|set| set.contains(name))
    }
}

/// Result of one guardrail phase.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailOutcome {
    /// `false` when any (possibly overridden) result blocks.
    pub passed: bool,
    /// Completed results in rule registration order.
    pub results: Vec<GuardrailResult>,
}

impl GuardrailOutcome {
    /// First blocking result, if any.
    #[must_use]
    pub fn first_block(&self) -> Option<&GuardrailResult> {
        self.results.iter().find(|r| r.is_block())
    }

    fn fail_closed(rule: &str, message: impl Into<String>, details: Value) -> Self {
        Self {
            passed: false,
            results: vec![GuardrailResult::block(rule, message, details)],
        }
    }
}

enum Collected {
    Done(Vec<(usize, GuardrailResult)>),
    Failed(RuleError),
}

/// Runs the enabled subset of a [`RuleSet`] concurrently.
#[derive(Debug, Clone)]
pub struct GuardrailRunner {
    rules: Arc<RuleSet>,
    metrics: Arc<Metrics>,
}

impl GuardrailRunner {
    /// Create a runner over `rules`, recording into `metrics`.
    #[must_use]
    pub const fn new(rules: Arc<RuleSet>, metrics: Arc<Metrics>) -> Self {
        Self { rules, metrics }
    }

    /// Rules known to this runner.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate `payload` for `phase`.
    pub async fn run(&self, payload: &Value, phase: Phase, opts: &GuardrailOptions) -> GuardrailOutcome {
        let selected: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| opts.is_enabled(r.name) && r.phase.applies_to(phase))
            .copied()
            .collect();
        if selected.is_empty() {
            return GuardrailOutcome { passed: true, results: Vec::new() };
        }

        let payload = Arc::new(payload.clone());
        let mut tasks = JoinSet::new();
        // Rules still running, removed as their tasks are joined.
        let mut pending: HashMap<Id, &'static str> = HashMap::with_capacity(selected.len());
        for (idx, rule) in selected.iter().copied().enumerate() {
            let payload = Arc::clone(&payload);
            let handle = tasks.spawn_blocking(move || (idx, (rule.check)(&payload)));
            pending.insert(handle.id(), rule.name);
        }

        let collected = tokio::time::timeout(
            opts.timeout,
            self.collect(&mut tasks, &mut pending, &selected, opts.fail_open),
        )
        .await;

        let mut results = match collected {
            Ok(Collected::Done(results)) => results,
            Ok(Collected::Failed(err)) => {
                return GuardrailOutcome::fail_closed(ERROR_RULE, err.to_string(), json!({ "rule": err.rule }));
            }
            Err(_) => {
                tasks.abort_all();
                let timed_out: Vec<&str> = selected
                    .iter()
                    .map(|r| r.name)
                    .filter(|name| pending.values().any(|p| p == name))
                    .collect();
                for rule in timed_out.iter().copied() {
                    self.metrics.guardrail_timeouts.inc(&[("rule", rule)]);
                }
                warn!(
                    %phase,
                    timeout_secs = opts.timeout.as_secs_f64(),
                    rules = ?timed_out,
                    fail_open = opts.fail_open,
                    "guardrail timeout"
                );
                if opts.fail_open {
                    return GuardrailOutcome { passed: true, results: Vec::new() };
                }
                return GuardrailOutcome::fail_closed(
                    TIMEOUT_RULE,
                    "Guardrail timeout",
                    json!({ "timeout_seconds": opts.timeout.as_secs_f64(), "pending": timed_out }),
                );
            }
        };

        results.sort_by_key(|(idx, _)| *idx);
        let results: Vec<GuardrailResult> = results
            .into_iter()
            .map(|(_, r)| apply_override(r, &opts.overrides))
            .collect();

        for r in &results {
            match r.action {
                GuardrailAction::Flag => self.metrics.guardrail_flagged.inc(&[("rule", &r.rule_name)]),
                GuardrailAction::Block => self.metrics.guardrail_blocked.inc(&[("rule", &r.rule_name)]),
                GuardrailAction::Allow => {}
            }
        }
        let passed = !results.iter().any(GuardrailResult::is_block);
        debug!(%phase, passed, results = results.len(), "guardrails evaluated");
        GuardrailOutcome { passed, results }
    }

    async fn collect(
        &self,
        tasks: &mut JoinSet<(usize, Result<GuardrailResult, RuleError>)>,
        pending: &mut HashMap<Id, &'static str>,
        selected: &[Rule],
        fail_open: bool,
    ) -> Collected {
        let mut done = Vec::with_capacity(selected.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let err = match joined {
                Ok((id, (idx, Ok(result)))) => {
                    pending.remove(&id);
                    done.push((idx, result));
                    continue;
                }
                Ok((id, (idx, Err(mut err)))) => {
                    pending.remove(&id);
                    err.rule = selected[idx].name.to_string();
                    err
                }
                Err(join_err) => RuleError {
                    rule: pending.remove(&join_err.id()).unwrap_or("unknown").to_string(),
                    reason: if join_err.is_panic() { "rule panicked".into() } else { join_err.to_string() },
                },
            };
            self.metrics.guardrail_errors.inc(&[("rule", &err.rule)]);
            error!(rule = %err.rule, reason = %err.reason, fail_open, "guardrail rule failed");
            if !fail_open {
                tasks.abort_all();
                return Collected::Failed(err);
            }
        }
        Collected::Done(done)
    }
}

fn apply_override(mut result: GuardrailResult, overrides: &HashMap<String, GuardrailAction>) -> GuardrailResult {
    if let Some(&action) = overrides.get(&result.rule_name) {
        if result.action != GuardrailAction::Allow && action > result.action {
            result.action = action;
            result.passed = false;
        }
    }
    result
}

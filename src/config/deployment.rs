//! Per-deployment guardrail and policy configuration.
//!
//! Deployments carry a free-form JSON blob. It is parsed into a typed
//! [`DeploymentPolicy`] on top of [`OrchestratorSettings`]: unknown keys and
//! unknown rule names are reported as warnings and ignored, while a known key
//! with the wrong type rejects the whole blob.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::settings::{OrchestratorSettings, MAX_GUARDRAIL_TIMEOUT, MAX_WAIT};
use crate::core::ConfigError;
use crate::guardrails::{GuardrailAction, GuardrailOptions, RuleSet};
use crate::policy::PolicyThresholds;

#[derive(Debug, Default, Deserialize)]
struct RawDeploymentConfig {
    gpu: Option<bool>,
    guardrails: Option<RawGuardrails>,
    guardrail_rules: Option<BTreeMap<String, RawRuleConfig>>,
    guardrail_fail_open: Option<bool>,
    guardrail_timeout: Option<f64>,
    guardrail_block_max: Option<u32>,
    guardrail_block_window: Option<u64>,
    policy: Option<RawPolicy>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGuardrails {
    List(Vec<String>),
    Map(BTreeMap<String, RawRuleConfig>),
}

#[derive(Debug, Default, Deserialize)]
struct RawRuleConfig {
    action: Option<GuardrailAction>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPolicy {
    block_threshold: Option<f64>,
    log_threshold: Option<f64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// Resolved configuration for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPolicy {
    /// Bill elapsed time as GPU seconds.
    pub gpu: bool,
    /// Enabled rules; `None` enables every known rule.
    pub enabled_rules: Option<BTreeSet<String>>,
    /// Per-rule action overrides.
    pub overrides: HashMap<String, GuardrailAction>,
    /// Allow on guardrail error or timeout.
    pub fail_open: bool,
    /// Guardrail phase deadline.
    pub guardrail_timeout: Duration,
    /// Blocks tolerated per window.
    pub block_max: u32,
    /// Block-rate window.
    pub block_window: Duration,
    /// Policy thresholds.
    pub thresholds: PolicyThresholds,
    /// Ignored or suspicious entries found while parsing.
    pub warnings: Vec<String>,
}

impl DeploymentPolicy {
    /// Policy with every value taken from `settings`.
    #[must_use]
    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self {
            gpu: false,
            enabled_rules: None,
            overrides: HashMap::new(),
            fail_open: settings.guardrail_fail_open,
            guardrail_timeout: settings.guardrail_timeout(),
            block_max: settings.guardrail_block_max_per_window,
            block_window: settings.guardrail_block_window(),
            thresholds: PolicyThresholds::new(settings.policy_block_threshold, settings.policy_log_threshold),
            warnings: Vec::new(),
        }
    }

    /// Parse a deployment blob against `settings` and the known `rules`.
    ///
    /// `null` and `{}` yield the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the blob is not an object or a
    /// recognized key holds a value of the wrong type.
    pub fn resolve(blob: &Value, settings: &OrchestratorSettings, rules: &RuleSet) -> Result<Self, ConfigError> {
        let raw: RawDeploymentConfig = match blob {
            Value::Null => RawDeploymentConfig::default(),
            Value::Object(_) => {
                RawDeploymentConfig::deserialize(blob).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            other => {
                return Err(ConfigError::Parse(format!(
                    "expected an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut policy = Self::from_settings(settings);
        let warnings = &mut policy.warnings;
        for key in raw.unknown.keys() {
            warnings.push(format!("unknown key `{key}` ignored"));
        }

        if let Some(gpu) = raw.gpu {
            policy.gpu = gpu;
        }
        if let Some(fail_open) = raw.guardrail_fail_open {
            policy.fail_open = fail_open;
        }
        match raw.guardrail_timeout {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => {
                warnings.push(format!("guardrail_timeout {secs} is not positive, using default"));
            }
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if timeout <= MAX_GUARDRAIL_TIMEOUT => policy.guardrail_timeout = timeout,
                _ => {
                    warnings.push(format!(
                        "guardrail_timeout {secs} exceeds {}s, capped",
                        MAX_GUARDRAIL_TIMEOUT.as_secs()
                    ));
                    policy.guardrail_timeout = MAX_GUARDRAIL_TIMEOUT;
                }
            },
            None => {}
        }
        match raw.guardrail_block_max {
            Some(0) => warnings.push("guardrail_block_max 0 is not positive, using default".into()),
            Some(max) => policy.block_max = max,
            None => {}
        }
        match raw.guardrail_block_window {
            Some(0) => warnings.push("guardrail_block_window 0 is not positive, using default".into()),
            Some(secs) if secs > MAX_WAIT.as_secs() => {
                warnings.push(format!("guardrail_block_window {secs} exceeds {}s, capped", MAX_WAIT.as_secs()));
                policy.block_window = MAX_WAIT;
            }
            Some(secs) => policy.block_window = Duration::from_secs(secs),
            None => {}
        }

        let mut rule_configs = BTreeMap::new();
        match raw.guardrails {
            None => {}
            Some(RawGuardrails::List(names)) => {
                policy.enabled_rules = Some(known_rules(names, rules, warnings));
            }
            Some(RawGuardrails::Map(entries)) => {
                let names: Vec<String> = entries.keys().cloned().collect();
                policy.enabled_rules = Some(known_rules(names, rules, warnings));
                rule_configs.extend(entries);
            }
        }
        rule_configs.extend(raw.guardrail_rules.unwrap_or_default());
        for (name, cfg) in rule_configs {
            if !rules.contains(&name) {
                warnings.push(format!("override for unknown rule `{name}` ignored"));
                continue;
            }
            for key in cfg.unknown.keys() {
                warnings.push(format!("unknown key `{key}` in rule `{name}` ignored"));
            }
            if let Some(action) = cfg.action {
                policy.overrides.insert(name, action);
            }
        }

        if let Some(p) = raw.policy {
            for key in p.unknown.keys() {
                warnings.push(format!("unknown key `policy.{key}` ignored"));
            }
            policy.thresholds = PolicyThresholds::new(
                p.block_threshold.unwrap_or(policy.thresholds.block_threshold),
                p.log_threshold.unwrap_or(policy.thresholds.log_threshold),
            );
        }
        if let Some(w) = policy.thresholds.warning() {
            policy.warnings.push(w);
        }
        Ok(policy)
    }

    /// Runner options for this deployment.
    #[must_use]
    pub fn guardrail_options(&self) -> GuardrailOptions {
        GuardrailOptions {
            enabled_rules: self.enabled_rules.clone(),
            overrides: self.overrides.clone(),
            timeout: self.guardrail_timeout,
            fail_open: self.fail_open,
        }
    }
}

fn known_rules(names: Vec<String>, rules: &RuleSet, warnings: &mut Vec<String>) -> BTreeSet<String> {
    names
        .into_iter()
        .filter(|name| {
            let known = rules.contains(name);
            if !known {
                warnings.push(format!("unknown rule `{name}` ignored"));
            }
            known
        })
        .collect()
}

const fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

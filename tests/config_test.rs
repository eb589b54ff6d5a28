//! Tests for orchestrator settings and per-deployment configuration

use std::collections::HashMap;
use std::time::Duration;

use prometheus_orchestrator::config::{DeploymentPolicy, OrchestratorSettings};
use prometheus_orchestrator::core::{ConfigError, RuleError};
use prometheus_orchestrator::guardrails::{GuardrailAction, GuardrailResult, Rule, RulePhase, RuleSet};
use prometheus_orchestrator::policy::PolicyThresholds;
use serde_json::{json, Value};

fn toxicity(_: &Value) -> Result<GuardrailResult, RuleError> {
    Ok(GuardrailResult::allow("toxicity"))
}

#[test]
fn test_settings_validation() {
    let valid = OrchestratorSettings::default();
    assert!(valid.validate().is_ok());

    let invalid = OrchestratorSettings {
        guardrail_block_max_per_window: 0,
        ..OrchestratorSettings::default()
    };
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::Invalid { field: "guardrail_block_max_per_window", .. })
    ));
}

#[test]
fn test_settings_invalid_guardrail_timeout() {
    for secs in [0.0, -1.0, f64::NAN] {
        let invalid = OrchestratorSettings {
            guardrail_timeout_seconds: secs,
            ..OrchestratorSettings::default()
        };
        assert!(invalid.validate().is_err(), "{secs} accepted");
    }
}

#[test]
fn test_settings_thresholds_out_of_range() {
    let invalid = OrchestratorSettings {
        policy_log_threshold: 1.5,
        ..OrchestratorSettings::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_settings_from_environment_lookup() {
    let vars: HashMap<&str, &str> = [
        ("ORCHESTRATOR_GUARDRAIL_BLOCK_MAX_PER_WINDOW", "3"),
        ("ORCHESTRATOR_POLICY_BLOCK_THRESHOLD", "0.4"),
        ("ORCHESTRATOR_SIMULATED_DELAY_MS", "0"),
        ("UNRELATED", "x"),
    ]
    .into_iter()
    .collect();

    let settings = OrchestratorSettings::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

    assert_eq!(settings.guardrail_block_max_per_window, 3);
    assert!((settings.policy_block_threshold - 0.4).abs() < f64::EPSILON);
    assert_eq!(settings.simulated_delay(), Duration::ZERO);
    assert_eq!(settings.queue_poll_timeout(), Duration::from_secs(5));
}

#[test]
fn test_settings_from_environment_rejects_invalid_result() {
    let err = OrchestratorSettings::from_lookup(|k| {
        (k == "ORCHESTRATOR_QUEUE_POLL_TIMEOUT_SECONDS").then(|| "0".to_string())
    })
    .unwrap_err();
    assert!(err.to_string().contains("queue_poll_timeout_seconds"));
}

#[test]
fn test_settings_json_round_trip() {
    let settings = OrchestratorSettings {
        inference_url: Some("http://inference:8080".into()),
        ..OrchestratorSettings::default()
    };
    let text = serde_json::to_string(&settings).unwrap();
    assert_eq!(OrchestratorSettings::from_json_str(&text).unwrap(), settings);
}

#[test]
fn test_deployment_defaults_follow_settings() {
    let settings = OrchestratorSettings {
        guardrail_fail_open: false,
        guardrail_block_window_seconds: 90,
        policy_block_threshold: 0.2,
        ..OrchestratorSettings::default()
    };

    let policy = DeploymentPolicy::resolve(&json!({}), &settings, &RuleSet::builtin()).unwrap();

    assert!(!policy.fail_open);
    assert_eq!(policy.block_window, Duration::from_secs(90));
    assert_eq!(policy.thresholds, PolicyThresholds::new(0.2, 0.7));
}

#[test]
fn test_deployment_recognizes_registered_custom_rule() {
    let rules = RuleSet::builtin().with_rule(Rule::new("toxicity", RulePhase::Output, toxicity));
    let blob = json!({"guardrails": {"toxicity": {"action": "block"}}});

    let policy = DeploymentPolicy::resolve(&blob, &OrchestratorSettings::default(), &rules).unwrap();

    assert!(policy.warnings.is_empty());
    assert_eq!(policy.overrides.get("toxicity"), Some(&GuardrailAction::Block));
    let without = DeploymentPolicy::resolve(&blob, &OrchestratorSettings::default(), &RuleSet::builtin()).unwrap();
    assert!(without.overrides.is_empty());
    assert_eq!(without.warnings.len(), 2);
}

#[test]
fn test_deployment_rejects_non_object_blob() {
    let err = DeploymentPolicy::resolve(&json!("gpu"), &OrchestratorSettings::default(), &RuleSet::builtin())
        .unwrap_err();
    assert_eq!(err.to_string(), "parse error: expected an object, got a string");
}

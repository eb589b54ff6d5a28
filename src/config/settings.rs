//! Process-wide orchestrator settings.
//!
//! Loaded from JSON or from `ORCHESTRATOR_*` environment variables (a `.env`
//! file is read first when present). These are the defaults every deployment
//! configuration falls back to.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "ORCHESTRATOR_";

/// Longest guardrail phase deadline a setting or deployment may ask for.
pub const MAX_GUARDRAIL_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest window, wait or timeout any other setting may ask for: one day.
pub const MAX_WAIT: Duration = Duration::from_secs(86_400);

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Deadline for one guardrail phase, seconds.
    pub guardrail_timeout_seconds: f64,
    /// Allow when guardrails error or time out.
    pub guardrail_fail_open: bool,
    /// Blocks tolerated per tenant and deployment within one window.
    pub guardrail_block_max_per_window: u32,
    /// Block-rate window, seconds.
    pub guardrail_block_window_seconds: u64,
    /// Default policy block threshold.
    pub policy_block_threshold: f64,
    /// Default policy log threshold.
    pub policy_log_threshold: f64,
    /// How long one dequeue waits before re-checking for shutdown, seconds.
    pub queue_poll_timeout_seconds: u64,
    /// Pause after a queue failure, seconds.
    pub queue_error_backoff_seconds: u64,
    /// Interval between completion polls on the compute platform, seconds.
    pub dispatch_poll_interval_seconds: u64,
    /// Total wait for a unit of work, seconds.
    pub dispatch_timeout_seconds: u64,
    /// Direct inference endpoint, used when no compute platform is configured.
    pub inference_url: Option<String>,
    /// Request timeout for the direct inference endpoint, seconds.
    pub inference_http_timeout_seconds: u64,
    /// Delay of the simulated backend, milliseconds.
    pub simulated_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            guardrail_timeout_seconds: 5.0,
            guardrail_fail_open: true,
            guardrail_block_max_per_window: 5,
            guardrail_block_window_seconds: 300,
            policy_block_threshold: 0.3,
            policy_log_threshold: 0.7,
            queue_poll_timeout_seconds: 5,
            queue_error_backoff_seconds: 5,
            dispatch_poll_interval_seconds: 2,
            dispatch_timeout_seconds: 300,
            inference_url: None,
            inference_http_timeout_seconds: 120,
            simulated_delay_ms: 1000,
        }
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

fn at_most(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} exceeds the maximum of {max}"),
        });
    }
    Ok(())
}

fn lookup_parsed<T, F>(lookup: &F, field: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
    lookup(&key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                field,
                reason: format!("{key}={raw}: {e}"),
            })
        })
        .transpose()
}

macro_rules! override_from {
    ($lookup:expr, $cfg:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = lookup_parsed($lookup, stringify!($field))? {
                $cfg.$field = v;
            }
        )+
    };
}

impl OrchestratorSettings {
    /// Validate value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.guardrail_timeout_seconds;
        if !(timeout.is_finite() && timeout > 0.0 && timeout <= MAX_GUARDRAIL_TIMEOUT.as_secs_f64()) {
            return Err(ConfigError::Invalid {
                field: "guardrail_timeout_seconds",
                reason: format!(
                    "must be a positive number of seconds up to {}",
                    MAX_GUARDRAIL_TIMEOUT.as_secs()
                ),
            });
        }
        positive("guardrail_block_max_per_window", u64::from(self.guardrail_block_max_per_window))?;
        positive("guardrail_block_window_seconds", self.guardrail_block_window_seconds)?;
        positive("queue_poll_timeout_seconds", self.queue_poll_timeout_seconds)?;
        positive("dispatch_poll_interval_seconds", self.dispatch_poll_interval_seconds)?;
        positive("dispatch_timeout_seconds", self.dispatch_timeout_seconds)?;
        positive("inference_http_timeout_seconds", self.inference_http_timeout_seconds)?;
        let max = MAX_WAIT.as_secs();
        for (field, v) in [
            ("guardrail_block_window_seconds", self.guardrail_block_window_seconds),
            ("queue_poll_timeout_seconds", self.queue_poll_timeout_seconds),
            ("queue_error_backoff_seconds", self.queue_error_backoff_seconds),
            ("dispatch_poll_interval_seconds", self.dispatch_poll_interval_seconds),
            ("dispatch_timeout_seconds", self.dispatch_timeout_seconds),
            ("inference_http_timeout_seconds", self.inference_http_timeout_seconds),
        ] {
            at_most(field, v, max)?;
        }
        at_most("simulated_delay_ms", self.simulated_delay_ms, max * 1000)?;
        for (field, v) in [
            ("policy_block_threshold", self.policy_block_threshold),
            ("policy_log_threshold", self.policy_log_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{v} is outside [0, 1]"),
                });
            }
        }
        if self.policy_block_threshold > self.policy_log_threshold {
            return Err(ConfigError::Invalid {
                field: "policy_block_threshold",
                reason: "must not exceed policy_log_threshold".into(),
            });
        }
        Ok(())
    }

    /// Parse settings from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or the validation error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read `ORCHESTRATOR_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable does not parse or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        override_from!(
            &lookup,
            cfg,
            guardrail_timeout_seconds,
            guardrail_fail_open,
            guardrail_block_max_per_window,
            guardrail_block_window_seconds,
            policy_block_threshold,
            policy_log_threshold,
            queue_poll_timeout_seconds,
            queue_error_backoff_seconds,
            dispatch_poll_interval_seconds,
            dispatch_timeout_seconds,
            inference_http_timeout_seconds,
            simulated_delay_ms,
        );
        if let Some(url) = lookup_parsed::<String, _>(&lookup, "inference_url")? {
            cfg.inference_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Guardrail phase deadline, capped at [`MAX_GUARDRAIL_TIMEOUT`].
    #[must_use]
    pub fn guardrail_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.guardrail_timeout_seconds)
            .map_or(MAX_GUARDRAIL_TIMEOUT, |d| d.min(MAX_GUARDRAIL_TIMEOUT))
    }

    /// Block-rate window.
    #[must_use]
    pub const fn guardrail_block_window(&self) -> Duration {
        Duration::from_secs(self.guardrail_block_window_seconds)
    }

    /// Dequeue wait.
    #[must_use]
    pub const fn queue_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_poll_timeout_seconds)
    }

    /// Pause after a queue failure.
    #[must_use]
    pub const fn queue_error_backoff(&self) -> Duration {
        Duration::from_secs(self.queue_error_backoff_seconds)
    }

    /// Completion poll interval.
    #[must_use]
    pub const fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_poll_interval_seconds)
    }

    /// Total wait for a unit of work.
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }

    /// Direct inference request timeout.
    #[must_use]
    pub const fn inference_http_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_http_timeout_seconds)
    }

    /// Simulated backend delay.
    #[must_use]
    pub const fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }
}

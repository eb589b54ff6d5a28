//! Dispatcher selection.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::OrchestratorSettings;
use crate::core::AppResult;
use crate::dispatch::{ComputeDispatcher, ComputePlatform, ResultStore};

/// Handles for the orchestration-platform strategy.
#[derive(Clone)]
pub struct PlatformBackend {
    /// Platform units of work are created on.
    pub platform: Arc<dyn ComputePlatform>,
    /// Store the units write results into.
    pub results: Arc<dyn ResultStore>,
}

/// Pick the dispatch strategy.
///
/// Precedence: an orchestration platform when one is supplied, then the
/// direct inference endpoint when `settings.inference_url` is set, then the
/// simulated backend.
///
/// # Errors
///
/// Fails when the HTTP client cannot be constructed, or when an inference
/// URL is configured but the crate was built without `http-dispatch`.
pub fn build_dispatcher(
    settings: &OrchestratorSettings,
    platform: Option<PlatformBackend>,
) -> AppResult<ComputeDispatcher> {
    if let Some(backend) = platform {
        info!(
            poll_interval_secs = settings.dispatch_poll_interval_seconds,
            timeout_secs = settings.dispatch_timeout_seconds,
            "dispatching to orchestration platform"
        );
        return Ok(ComputeDispatcher::orchestrated(
            backend.platform,
            backend.results,
            settings.dispatch_poll_interval(),
            settings.dispatch_timeout(),
        ));
    }

    if let Some(url) = settings.inference_url.as_deref().filter(|u| !u.trim().is_empty()) {
        return http_dispatcher(url, settings);
    }

    info!(delay_ms = settings.simulated_delay_ms, "no compute backend configured, simulating runs");
    Ok(ComputeDispatcher::simulated(settings.simulated_delay()))
}

#[cfg(feature = "http-dispatch")]
fn http_dispatcher(url: &str, settings: &OrchestratorSettings) -> AppResult<ComputeDispatcher> {
    use crate::dispatch::{DispatchStrategy, HttpInferenceClient};

    let client = HttpInferenceClient::new(url, settings.inference_http_timeout())
        .with_context(|| format!("building inference client for {url}"))?;
    info!(url = client.run_url(), "dispatching to inference endpoint");
    Ok(ComputeDispatcher::new(DispatchStrategy::Http(client)))
}

#[cfg(not(feature = "http-dispatch"))]
fn http_dispatcher(url: &str, _settings: &OrchestratorSettings) -> AppResult<ComputeDispatcher> {
    anyhow::bail!("inference_url {url} is set but http-dispatch support is not compiled in")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_simulation() {
        let dispatcher = build_dispatcher(&OrchestratorSettings::default(), None).unwrap();
        assert_eq!(dispatcher.strategy().name(), "simulated");
    }

    #[cfg(feature = "http-dispatch")]
    #[test]
    fn inference_url_selects_http() {
        let settings = OrchestratorSettings {
            inference_url: Some("http://localhost:9000".into()),
            ..OrchestratorSettings::default()
        };
        let dispatcher = build_dispatcher(&settings, None).unwrap();
        assert_eq!(dispatcher.strategy().name(), "http");
    }
}

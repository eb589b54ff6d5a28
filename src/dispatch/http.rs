//! Direct HTTP inference endpoint.

use std::time::Duration;

use serde_json::json;

use crate::core::DispatchError;
use crate::dispatch::{DispatchRequest, InferenceResult};

/// Client for `POST {base_url}/run`.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    run_url: String,
}

impl HttpInferenceClient {
    /// Build a client with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Inference`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Inference(e.to_string()))?;
        Ok(Self {
            client,
            run_url: format!("{}/run", base_url.trim_end_matches('/')),
        })
    }

    /// Endpoint called for each job.
    #[must_use]
    pub fn run_url(&self) -> &str {
        &self.run_url
    }

    pub(crate) async fn run(&self, req: &DispatchRequest<'_>) -> Result<InferenceResult, DispatchError> {
        let resp = self
            .client
            .post(&self.run_url)
            .json(&json!({ "job_id": req.job_id, "input": req.input }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DispatchError::Inference(e.to_string()))?;
        resp.json::<InferenceResult>()
            .await
            .map_err(|e| DispatchError::Inference(e.to_string()))
    }
}

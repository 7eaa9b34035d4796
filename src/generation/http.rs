use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{GenerationError, GenerationInputs, ImageGenerator};
use crate::utils::http::{get_http_client, truncate_for_log};
use crate::utils::timing::log_external_call;

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    request_id: &'a str,
    mode: &'a str,
    style: &'a str,
    prompt: &'a str,
    image_url: &'a str,
}

/// JSON-over-HTTP generation backend authenticated with a bearer key.
pub struct HttpImageGenerator {
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpImageGenerator {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self {
            endpoint,
            api_key,
            timeout,
        }
    }

    async fn call(&self, inputs: &GenerationInputs) -> Result<String, GenerationError> {
        let payload = GenerationRequest {
            request_id: &inputs.correlation_id,
            mode: &inputs.mode_code,
            style: &inputs.style_code,
            prompt: &inputs.prompt,
            image_url: &inputs.reference_image,
        };

        let mut request = get_http_client()
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::Backend(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Generation backend error: status={}, body={}",
                status,
                truncate_for_log(&body, 2000)
            );
            return Err(GenerationError::Backend(format!("status {status}")));
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|err| GenerationError::Backend(format!("invalid response body: {err}")))?;
        debug!(
            "Generation response received for request_id={}",
            inputs.correlation_id
        );
        extract_artifact_reference(&value).ok_or(GenerationError::EmptyResult)
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(&self, inputs: &GenerationInputs) -> Result<String, GenerationError> {
        if self.endpoint.trim().is_empty() {
            return Err(GenerationError::NotConfigured);
        }
        let metadata = json!({
            "request_id": inputs.correlation_id,
            "style": inputs.style_code,
            "mode": inputs.mode_code,
        });
        log_external_call("generation", "generate", Some(metadata), || self.call(inputs)).await
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Accepts the response shapes common image APIs use.
pub fn extract_artifact_reference(value: &Value) -> Option<String> {
    for pointer in ["/url", "/image_url", "/output/0", "/images/0", "/data/0/url"] {
        if let Some(reference) = non_empty(value.pointer(pointer)) {
            return Some(reference);
        }
    }
    if let Some(url) = non_empty(value.pointer("/images/0/url")) {
        return Some(url);
    }
    non_empty(value.pointer("/data/0/b64_json"))
        .map(|payload| format!("data:image/png;base64,{payload}"))
}

//! The image-generation backend seen as one opaque async call.

use std::time::Duration;

use async_trait::async_trait;

pub mod http;

#[cfg(test)]
pub mod scripted;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInputs {
    pub correlation_id: String,
    pub mode_code: String,
    pub style_code: String,
    pub prompt: String,
    /// The user's reference photo as a base64 `data:` URI.
    pub reference_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation backend is not configured")]
    NotConfigured,
    #[error("generation backend failed: {0}")]
    Backend(String),
    #[error("generation did not finish within {0:?}")]
    Timeout(Duration),
    #[error("generation returned no usable artifact")]
    EmptyResult,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns an artifact reference: an http(s) URL or a base64 `data:` URI.
    async fn generate(&self, inputs: &GenerationInputs) -> Result<String, GenerationError>;
}

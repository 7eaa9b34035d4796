use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use tracing::{error, warn};

use crate::utils::http::{get_http_client, truncate_for_log};
use crate::utils::timing::log_external_call;

const FETCH_MAX_ATTEMPTS: usize = 3;
const FETCH_BASE_DELAY_MS: u64 = 400;
const FETCH_ERROR_BODY_LIMIT: usize = 800;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported artifact reference")]
    Unsupported,
    #[error("invalid inline artifact: {0}")]
    InvalidInline(String),
    #[error("artifact download failed: {0}")]
    Download(String),
    #[error("artifact is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl FetchedArtifact {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let (mime_type, extension) = infer::get(&bytes)
            .map(|kind| (kind.mime_type().to_string(), kind.extension()))
            .unwrap_or_else(|| ("image/jpeg".to_string(), "jpg"));
        Self {
            bytes,
            mime_type,
            file_name: format!("result.{extension}"),
        }
    }

    /// Inline form for backends that take the image in the request body.
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

/// Turns an http(s) or `data:` reference into bytes.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<FetchedArtifact, FetchError>;
}

#[derive(Debug, Default, Clone)]
pub struct HttpArtifactFetcher;

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, reference: &str) -> Result<FetchedArtifact, FetchError> {
        let bytes = if reference.starts_with("data:") {
            decode_data_uri(reference)?
        } else if reference.starts_with("http://") || reference.starts_with("https://") {
            log_external_call("artifact", "download", None, || download(reference)).await?
        } else {
            return Err(FetchError::Unsupported);
        };

        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(FetchedArtifact::from_bytes(bytes))
    }
}

/// Decodes `data:<mime>;base64,<payload>` references some backends return instead of URLs.
pub fn decode_data_uri(reference: &str) -> Result<Vec<u8>, FetchError> {
    let rest = reference
        .strip_prefix("data:")
        .ok_or(FetchError::Unsupported)?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidInline("missing payload separator".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(FetchError::InvalidInline(
            "only base64 payloads are supported".to_string(),
        ));
    }
    BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|err| FetchError::InvalidInline(err.to_string()))
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(FETCH_BASE_DELAY_MS << attempt)
}

async fn download(url: &str) -> Result<Vec<u8>, FetchError> {
    let client = get_http_client();
    let mut last_error = String::from("no attempt made");

    for attempt in 0..FETCH_MAX_ATTEMPTS {
        let final_attempt = attempt + 1 == FETCH_MAX_ATTEMPTS;
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                // Telegram file URLs carry the bot token.
                let err = err.without_url();
                warn!(
                    "Failed to fetch artifact: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    FETCH_MAX_ATTEMPTS
                );
                last_error = err.to_string();
                if !should_retry_error(&err) || final_attempt {
                    break;
                }
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Artifact download failed with status {status}: {}",
                truncate_for_log(&body, FETCH_ERROR_BODY_LIMIT)
            );
            last_error = format!("status {status}");
            if !should_retry_status(status) || final_attempt {
                break;
            }
            tokio::time::sleep(backoff(attempt)).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                let err = err.without_url();
                error!(
                    "Failed to read artifact bytes: {err} (attempt={}/{})",
                    attempt + 1,
                    FETCH_MAX_ATTEMPTS
                );
                last_error = err.to_string();
                if final_attempt {
                    break;
                }
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
    }

    Err(FetchError::Download(last_error))
}

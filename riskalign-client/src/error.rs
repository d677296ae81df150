//! Transport errors and their mapping onto [`PipelineError`].

use riskalign_core::{PipelineError, ProviderId};
use serde::Deserialize;

/// Words in an error body that pin the failure on the AI backend.
const PROVIDER_MARKERS: [&str; 3] = ["provider", "ollama", "openai"];

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Classify this error for `operation`, attributing provider failures to
    /// `provider`.
    pub fn into_pipeline(self, operation: &str, provider: ProviderId) -> PipelineError {
        match self {
            Self::Http(e) if e.is_decode() => PipelineError::decode(operation, e.to_string()),
            Self::Http(e) => PipelineError::network(operation, e.to_string()),
            Self::Serde(e) => PipelineError::decode(operation, e.to_string()),
            Self::Status { status, body } => classify_status(operation, provider, status, &body),
            Self::Config(reason) => PipelineError::internal(reason),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Pull the human-readable message out of an error body.
///
/// Understands `{"detail": ...}` and `{"error": ...}`; anything else is
/// returned trimmed.
pub fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail.or(b.error));
    match parsed {
        Some(serde_json::Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    }
}

fn names_provider(message: &str) -> bool {
    let lower = message.to_lowercase();
    PROVIDER_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Map a non-success status onto the pipeline error taxonomy.
///
/// 5xx and any body naming the AI backend are provider failures; 400 and
/// 422 are validation failures; every other status is treated as the
/// service being unreachable at that route.
pub fn classify_status(operation: &str, provider: ProviderId, status: u16, body: &str) -> PipelineError {
    let mut message = error_message(body);
    if message.is_empty() {
        message = format!("HTTP {}", status);
    }

    if status >= 500 || names_provider(&message) {
        PipelineError::provider(provider.as_str(), operation, Some(status), message)
    } else if matches!(status, 400 | 422) {
        PipelineError::validation(operation, message)
    } else {
        PipelineError::network(operation, format!("HTTP {}: {}", status, message))
    }
}

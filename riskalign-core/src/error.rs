//! Error types for RiskAlign pipeline operations

use crate::StageName;
use thiserror::Error;

/// Ingestion errors.
///
/// A failed ingestion never touches the active context, so the previously
/// displayed batch stays authoritative.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Uploaded artifact {file_name} was empty")]
    EmptyArtifact { file_name: String },

    #[error("Artifact {file_name} could not be parsed: {reason}")]
    Unparsable { file_name: String, reason: String },

    #[error("Artifact {file_name} contained no valid records ({rejected} rejected)")]
    NoValidRecords { file_name: String, rejected: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or RISKALIGN_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Coarse classification of a pipeline failure.
///
/// `NotApplicable` is deliberately absent: "nothing to compute yet" is an
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient connectivity problem.
    NetworkFailure,
    /// The active AI backend is unhealthy or misconfigured.
    ProviderFailure,
    /// Malformed input handed to a stage.
    ValidationFailure,
    /// Anything raised by the orchestration layer itself.
    Internal,
}

/// Master error type for all pipeline operations.
///
/// `Clone` so that one failed computation can be handed to every waiter
/// attached to the same cache entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Network failure during {operation}: {reason}")]
    Network { operation: String, reason: String },

    #[error("Provider {provider} failed during {operation}: {message}")]
    Provider {
        provider: String,
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Validation failed for {operation}: {reason}")]
    Validation { operation: String, reason: String },

    #[error("Stage {stage} timed out after {timeout_ms}ms")]
    Timeout { stage: StageName, timeout_ms: u64 },

    #[error("No stage function registered for {stage}")]
    StageNotRegistered { stage: StageName },

    #[error("Could not decode response from {operation}: {reason}")]
    Decode { operation: String, reason: String },

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl PipelineError {
    pub fn network(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn validation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Classify this error into one of the documented failure kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::NetworkFailure,
            Self::Provider { .. } => ErrorKind::ProviderFailure,
            Self::Validation { .. } | Self::Ingest(_) => ErrorKind::ValidationFailure,
            Self::StageNotRegistered { .. }
            | Self::Decode { .. }
            | Self::Config(_)
            | Self::Persistence { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this failure should be reported on the provider failure channel.
    pub fn is_provider_failure(&self) -> bool {
        self.kind() == ErrorKind::ProviderFailure
    }
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

// =============================================================================
// TESTS
// =============================================================================

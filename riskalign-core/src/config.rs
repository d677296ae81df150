//! Pipeline configuration.
//!
//! Loaded from a TOML file given by the caller or named in `RISKALIGN_CONFIG`.
//! Without a file, every field falls back to its `RISKALIGN_*` environment
//! variable and then to the built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::{DEFAULT_FRAMEWORK, DEFAULT_MAX_HOURS_PER_WAVE};
use crate::{ConfigError, Context, ProviderId};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Base URL of the analytics service
    pub api_base_url: String,
    /// Per-HTTP-request timeout
    pub request_timeout_ms: u64,
    /// Deadline for one stage computation, ancestors excluded
    pub stage_timeout_ms: u64,
    /// Provider selected when no preference has been saved
    pub default_provider: ProviderId,
    pub max_hours_per_wave: u32,
    pub framework: String,
    /// Number of findings returned in an ingest preview
    pub preview_limit: usize,
    /// Where provider and planning preferences are saved; unset disables persistence
    pub preferences_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stage_timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            default_provider: ProviderId::default(),
            max_hours_per_wave: DEFAULT_MAX_HOURS_PER_WAVE,
            framework: DEFAULT_FRAMEWORK.to_string(),
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            preferences_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or the file named in `RISKALIGN_CONFIG`, falling
    /// back to the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path.map(Path::to_path_buf).or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Create PipelineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RISKALIGN_API_BASE_URL` (default: http://localhost:8000)
    /// - `RISKALIGN_REQUEST_TIMEOUT_MS` (default: 30000)
    /// - `RISKALIGN_STAGE_TIMEOUT_MS` (default: 60000)
    /// - `RISKALIGN_AI_PROVIDER`: `local` or `online` (default: local)
    /// - `RISKALIGN_MAX_HOURS_PER_WAVE` (default: 16)
    /// - `RISKALIGN_FRAMEWORK` (default: CIS)
    /// - `RISKALIGN_PREVIEW_LIMIT` (default: 5)
    /// - `RISKALIGN_PREFERENCES_PATH` (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base_url = std::env::var("RISKALIGN_API_BASE_URL").unwrap_or(defaults.api_base_url);

        let request_timeout_ms = std::env::var("RISKALIGN_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.request_timeout_ms);

        let stage_timeout_ms = std::env::var("RISKALIGN_STAGE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.stage_timeout_ms);

        let default_provider = std::env::var("RISKALIGN_AI_PROVIDER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_provider);

        let max_hours_per_wave = std::env::var("RISKALIGN_MAX_HOURS_PER_WAVE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_hours_per_wave);

        let framework = std::env::var("RISKALIGN_FRAMEWORK").unwrap_or(defaults.framework);

        let preview_limit = std::env::var("RISKALIGN_PREVIEW_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.preview_limit);

        let preferences_path = std::env::var("RISKALIGN_PREFERENCES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            api_base_url,
            request_timeout_ms,
            stage_timeout_ms,
            default_provider,
            max_hours_per_wave,
            framework,
            preview_limit,
            preferences_path,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.stage_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stage_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_hours_per_wave == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_hours_per_wave",
                reason: "must be > 0".to_string(),
            });
        }
        if self.framework.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "framework",
                reason: "must not be empty".to_string(),
            });
        }
        if self.preview_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "preview_limit",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// The context a fresh pipeline starts from.
    pub fn initial_context(&self) -> Context {
        Context::new(
            self.default_provider,
            self.max_hours_per_wave,
            self.framework.clone(),
        )
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("RISKALIGN_CONFIG").ok().map(PathBuf::from)
}

//! Persistence for user preferences.
//!
//! Read once when the pipeline starts and written once at shutdown.

use riskalign_core::{Context, ContextPatch, PipelineError, ProviderId};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub provider_id: ProviderId,
    pub max_hours_per_wave: u32,
    pub framework: String,
}

impl Preferences {
    pub fn from_context(context: &Context) -> Self {
        Self {
            provider_id: context.provider_id(),
            max_hours_per_wave: context.max_hours_per_wave(),
            framework: context.framework().to_string(),
        }
    }

    pub fn to_patch(&self) -> ContextPatch {
        ContextPatch::new()
            .provider(self.provider_id)
            .max_hours_per_wave(self.max_hours_per_wave)
            .framework(self.framework.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<PreferencesError> for PipelineError {
    fn from(err: PreferencesError) -> Self {
        PipelineError::Persistence {
            reason: err.to_string(),
        }
    }
}

pub fn load(path: &Path) -> Result<Option<Preferences>, PreferencesError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let prefs = serde_json::from_str::<Preferences>(&contents)?;
    Ok(Some(prefs))
}

pub fn save(path: &Path, prefs: &Preferences) -> Result<(), PreferencesError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(prefs)?;
    std::fs::write(path, contents)?;
    Ok(())
}

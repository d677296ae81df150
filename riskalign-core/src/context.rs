//! Cross-cutting pipeline context.
//!
//! A [`Context`] is an immutable snapshot. Every change produces a new value
//! with a higher generation, so a snapshot can safely participate in cache
//! keys and be shared across concurrently running stages.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BatchId, Fingerprint, PipelineResult};

// ============================================================================
// PROVIDERS
// ============================================================================

/// The AI backend used to execute provider-attributed stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Locally hosted model (Ollama)
    Local,
    /// Hosted model (OpenAI)
    Online,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Local, ProviderId::Online];

    /// Value sent in the `X-AI-Provider` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Online => "online",
        }
    }

    /// Default human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local => "Local (Ollama)",
            Self::Online => "Online (OpenAI)",
        }
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::Local
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing ProviderId from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdParseError(pub String);

impl fmt::Display for ProviderIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported AI provider '{}'", self.0)
    }
}

impl std::error::Error for ProviderIdParseError {}

impl FromStr for ProviderId {
    type Err = ProviderIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "online" => Ok(Self::Online),
            _ => Err(ProviderIdParseError(s.to_string())),
        }
    }
}

/// A provider offered by the analytics service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOption {
    pub id: ProviderId,
    pub label: String,
}

impl ProviderOption {
    /// The pair offered when the service cannot be asked.
    pub fn defaults() -> Vec<ProviderOption> {
        ProviderId::ALL
            .iter()
            .map(|id| ProviderOption {
                id: *id,
                label: id.label().to_string(),
            })
            .collect()
    }
}

// ============================================================================
// CONTEXT FIELDS
// ============================================================================

bitflags! {
    /// Set of context fields, used both for stage dependency declarations
    /// and for the change set computed by an update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFields: u8 {
        /// Selected AI provider
        const PROVIDER = 0b0000_0001;
        /// Remediation capacity per wave
        const MAX_HOURS_PER_WAVE = 0b0000_0010;
        /// Compliance framework for control mapping
        const FRAMEWORK = 0b0000_0100;
        /// Batch currently feeding the graph
        const ACTIVE_BATCH = 0b0000_1000;
    }
}

impl Default for ContextFields {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for ContextFields {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContextFields {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid ContextFields bits: {:#04x}", bits))
        })
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

pub const DEFAULT_MAX_HOURS_PER_WAVE: u32 = 16;
pub const DEFAULT_FRAMEWORK: &str = "CIS";

/// Immutable snapshot of the cross-cutting pipeline parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    provider_id: ProviderId,
    max_hours_per_wave: u32,
    framework: String,
    active_batch: Option<BatchId>,
    generation: u64,
}

/// The subset of a context a stage depends on, in canonical form.
#[derive(Serialize)]
struct ContextSubset<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_id: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_hours_per_wave: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    framework: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_batch: Option<Option<BatchId>>,
}

impl Context {
    pub fn new(provider_id: ProviderId, max_hours_per_wave: u32, framework: impl Into<String>) -> Self {
        Self {
            provider_id,
            max_hours_per_wave,
            framework: framework.into(),
            active_batch: None,
            generation: 0,
        }
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn max_hours_per_wave(&self) -> u32 {
        self.max_hours_per_wave
    }

    pub fn framework(&self) -> &str {
        &self.framework
    }

    pub fn active_batch(&self) -> Option<BatchId> {
        self.active_batch
    }

    /// Monotonic counter identifying this snapshot. Not part of any fingerprint.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fields whose values differ between `self` and `other`.
    pub fn diff(&self, other: &Context) -> ContextFields {
        let mut changed = ContextFields::empty();
        if self.provider_id != other.provider_id {
            changed |= ContextFields::PROVIDER;
        }
        if self.max_hours_per_wave != other.max_hours_per_wave {
            changed |= ContextFields::MAX_HOURS_PER_WAVE;
        }
        if self.framework != other.framework {
            changed |= ContextFields::FRAMEWORK;
        }
        if self.active_batch != other.active_batch {
            changed |= ContextFields::ACTIVE_BATCH;
        }
        changed
    }

    /// Apply a patch, returning the next snapshot and the fields that changed.
    ///
    /// A patch that changes nothing returns an identical snapshot with the
    /// same generation.
    pub fn apply(&self, patch: &ContextPatch) -> (Context, ContextFields) {
        let mut next = Context {
            provider_id: patch.provider_id.unwrap_or(self.provider_id),
            max_hours_per_wave: patch.max_hours_per_wave.unwrap_or(self.max_hours_per_wave),
            framework: patch
                .framework
                .clone()
                .unwrap_or_else(|| self.framework.clone()),
            active_batch: patch.active_batch.or(self.active_batch),
            generation: self.generation,
        };
        let changed = self.diff(&next);
        if !changed.is_empty() {
            next.generation = self.generation + 1;
        }
        (next, changed)
    }

    /// Fingerprint of the fields in `fields`, ignoring everything else.
    pub fn fingerprint(&self, fields: ContextFields) -> PipelineResult<Fingerprint> {
        let subset = ContextSubset {
            provider_id: fields
                .contains(ContextFields::PROVIDER)
                .then_some(self.provider_id),
            max_hours_per_wave: fields
                .contains(ContextFields::MAX_HOURS_PER_WAVE)
                .then_some(self.max_hours_per_wave),
            framework: fields
                .contains(ContextFields::FRAMEWORK)
                .then_some(self.framework.as_str()),
            active_batch: fields
                .contains(ContextFields::ACTIVE_BATCH)
                .then_some(self.active_batch),
        };
        Fingerprint::of(&subset)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ProviderId::default(), DEFAULT_MAX_HOURS_PER_WAVE, DEFAULT_FRAMEWORK)
    }
}

/// A partial update to a [`Context`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPatch {
    pub provider_id: Option<ProviderId>,
    pub max_hours_per_wave: Option<u32>,
    pub framework: Option<String>,
    pub active_batch: Option<BatchId>,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn max_hours_per_wave(mut self, hours: u32) -> Self {
        self.max_hours_per_wave = Some(hours);
        self
    }

    pub fn framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn active_batch(mut self, batch: BatchId) -> Self {
        self.active_batch = Some(batch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.provider_id.is_none()
            && self.max_hours_per_wave.is_none()
            && self.framework.is_none()
            && self.active_batch.is_none()
    }
}

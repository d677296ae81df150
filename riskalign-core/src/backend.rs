//! Backend traits.
//!
//! Pure seams between the orchestration layer and whatever computes stage
//! values. The HTTP implementations live in `riskalign-client`; the
//! pipeline only sees these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Context, ConversationState, PipelineResult, ProviderId, ProviderOption, RawFinding,
    StageInputs, StageName, StageOutput,
};

// ============================================================================
// STAGE FUNCTIONS
// ============================================================================

/// A pure, deterministic transformation registered for one stage.
///
/// Given equal inputs and an equal context subset, implementations must
/// produce equal outputs; the cache relies on it.
#[async_trait]
pub trait StageFunction: Send + Sync {
    /// The stage this function computes.
    fn stage(&self) -> StageName;

    /// Compute the stage output.
    async fn run(&self, inputs: StageInputs, context: &Context) -> PipelineResult<StageOutput>;
}

// ============================================================================
// INGESTION
// ============================================================================

/// An uploaded file, uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl RawArtifact {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Records extracted from an artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArtifact {
    pub accepted: Vec<RawFinding>,
    pub rejected: usize,
    /// Storage location reported by the parser, if any
    pub location: Option<String>,
}

/// Turns raw artifact bytes into findings.
#[async_trait]
pub trait ArtifactParser: Send + Sync {
    async fn parse(&self, artifact: &RawArtifact, context: &Context) -> PipelineResult<ParsedArtifact>;
}

// ============================================================================
// CHAT
// ============================================================================

/// One assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    /// Resolved intent keyword
    pub intent: String,
    /// Provider that produced the reply, as reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Set when the provider degraded but the service still answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<String>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        conversation: &ConversationState,
        prompt: &str,
        provider: ProviderId,
    ) -> PipelineResult<ChatReply>;
}

// ============================================================================
// PROVIDER DISCOVERY
// ============================================================================

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Providers currently offered. Never empty.
    async fn list_providers(&self) -> Vec<ProviderOption>;
}

//! RiskAlign Core - Pipeline Data Model
//!
//! Data types shared by every RiskAlign crate: findings and batches, the
//! context snapshot, the declared stage graph, stage outputs, the error
//! taxonomy, configuration, and the backend traits the pipeline calls
//! through. No I/O happens here.

mod artifacts;
mod backend;
mod config;
pub mod context;
mod conversation;
mod error;
mod finding;
mod fingerprint;
mod stage;

pub use artifacts::{
    ControlMapping, ControlMappingSet, CurvePoint, ImpactEstimate, PlanItem, PlanTotals,
    RemediationPlan, ScoreSet, ScoreTotals, ScoredFinding, StageArtifact, StageOutcome,
    StageOutput, SummaryDocument, Wave,
};
pub use backend::{
    ArtifactParser, ChatBackend, ChatReply, ParsedArtifact, ProviderDirectory, RawArtifact,
    StageFunction,
};
pub use config::{
    PipelineConfig, DEFAULT_API_BASE_URL, DEFAULT_PREVIEW_LIMIT, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_STAGE_TIMEOUT_MS,
};
pub use context::{
    Context, ContextFields, ContextPatch, ProviderId, ProviderIdParseError, ProviderOption,
};
pub use conversation::{ChatMessage, ConversationState, Role};
pub use error::{ConfigError, ErrorKind, IngestError, PipelineError, PipelineResult};
pub use finding::{AssetContext, Batch, BatchId, RawFinding};
pub use fingerprint::Fingerprint;
pub use stage::{StageInputs, StageName, StageNameParseError, StageParams};

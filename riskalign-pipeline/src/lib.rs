//! RiskAlign Pipeline
//!
//! Dependency-ordered stage execution over a shared [`StageCache`]. The
//! context store turns every context update into the matching invalidation,
//! the ingestion gate activates new batches, and provider failures are
//! reported once each on the failure broadcaster.
//!
//! ```ignore
//! let pipeline = Pipeline::builder(PipelineConfig::load(None)?)
//!     .with_stages(client.stage_functions())
//!     .with_parser(client.clone())
//!     .start()?;
//! pipeline.ingest(artifact).await?;
//! let plan = pipeline.request(StageName::Waves, StageParams::new()).await?;
//! ```

mod batches;
mod broadcaster;
mod chat;
mod context_store;
mod executor;
mod ingest;
mod pipeline;
pub mod preferences;
mod registry;

use riskalign_cache::StageCache;
use riskalign_core::StageArtifact;
use std::sync::Arc;

/// The cache every stage artifact lives in.
pub type ArtifactCache = StageCache<Arc<StageArtifact>>;

pub use batches::{BatchFindingsStage, BatchStore};
pub use broadcaster::{
    FailureListener, FnListener, NoticeSource, ProviderFailureBroadcaster, ProviderNotice,
    SubscriptionToken,
};
pub use chat::IntentChat;
pub use context_store::{ContextChange, ContextStore};
pub use executor::{Executor, RequestOptions, StageResult};
pub use ingest::{IngestReport, IngestionGate};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use preferences::Preferences;
pub use registry::StageRegistry;

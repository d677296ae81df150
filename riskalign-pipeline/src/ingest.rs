//! Ingestion gate.
//!
//! Turns an uploaded artifact into a [`Batch`] and makes it the active
//! batch. A failed ingestion leaves the context untouched.

use riskalign_core::{
    ArtifactParser, Batch, ContextPatch, IngestError, PipelineError, PipelineResult, RawArtifact,
    RawFinding, DEFAULT_PREVIEW_LIMIT,
};
use std::sync::Arc;

use crate::batches::BatchStore;
use crate::context_store::ContextStore;

/// What an accepted upload produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub batch: Arc<Batch>,
    pub accepted: usize,
    pub rejected: usize,
    pub total: usize,
    /// First few accepted findings
    pub preview: Vec<RawFinding>,
}

pub struct IngestionGate {
    parser: Arc<dyn ArtifactParser>,
    batches: Arc<BatchStore>,
    context: Arc<ContextStore>,
    preview_limit: usize,
}

impl IngestionGate {
    pub fn new(parser: Arc<dyn ArtifactParser>, batches: Arc<BatchStore>, context: Arc<ContextStore>) -> Self {
        Self {
            parser,
            batches,
            context,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub async fn ingest(&self, artifact: RawArtifact) -> PipelineResult<IngestReport> {
        if artifact.is_empty() {
            return Err(IngestError::EmptyArtifact {
                file_name: artifact.file_name,
            }
            .into());
        }

        let context = self.context.current();
        let parsed = match self.parser.parse(&artifact, &context).await {
            Ok(parsed) => parsed,
            Err(PipelineError::Validation { reason, .. } | PipelineError::Decode { reason, .. }) => {
                return Err(IngestError::Unparsable {
                    file_name: artifact.file_name,
                    reason,
                }
                .into());
            }
            Err(other) => return Err(other),
        };

        // Parsers may be lenient; re-check every record here.
        let mut rejected = parsed.rejected;
        let mut accepted = Vec::with_capacity(parsed.accepted.len());
        for finding in parsed.accepted {
            if finding.is_valid() {
                accepted.push(finding);
            } else {
                rejected += 1;
            }
        }

        if accepted.is_empty() {
            tracing::warn!(file = %artifact.file_name, rejected, "upload contained no valid findings");
            return Err(IngestError::NoValidRecords {
                file_name: artifact.file_name,
                rejected,
            }
            .into());
        }

        let batch = self
            .batches
            .insert(Batch::new(artifact.file_name, parsed.location, accepted))?;
        self.context
            .apply(&ContextPatch::new().active_batch(batch.id))?;

        let report = IngestReport {
            accepted: batch.len(),
            rejected,
            total: batch.len() + rejected,
            preview: batch.preview(self.preview_limit).to_vec(),
            batch,
        };
        tracing::info!(
            batch = %report.batch.id,
            name = %report.batch.name,
            accepted = report.accepted,
            rejected = report.rejected,
            "batch ingested"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for IngestionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionGate")
            .field("batches", &self.batches.len())
            .field("preview_limit", &self.preview_limit)
            .finish()
    }
}

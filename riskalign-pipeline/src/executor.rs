//! Dependency graph executor.
//!
//! Resolves a requested stage by first resolving its declared ancestors
//! (independent ancestors concurrently), then delegating to the cache with
//! a computation that invokes the registered stage function. Every stage of
//! one request sees the same context snapshot.

use futures_util::future::{join_all, BoxFuture};
use riskalign_cache::StageKey;
use riskalign_core::{
    Context, PipelineError, PipelineResult, StageArtifact, StageFunction, StageInputs, StageName,
    StageOutcome, StageParams,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::broadcaster::{NoticeSource, ProviderFailureBroadcaster};
use crate::registry::StageRegistry;
use crate::ArtifactCache;

/// Result of requesting a stage.
pub type StageResult = PipelineResult<StageOutcome<Arc<StageArtifact>>>;

/// Per-request knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for each stage computation started by this request.
    /// `None` uses the cache default.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct Executor {
    registry: Arc<StageRegistry>,
    cache: ArtifactCache,
    broadcaster: Arc<ProviderFailureBroadcaster>,
}

impl Executor {
    pub fn new(
        registry: Arc<StageRegistry>,
        cache: ArtifactCache,
        broadcaster: Arc<ProviderFailureBroadcaster>,
    ) -> Self {
        Self {
            registry,
            cache,
            broadcaster,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Resolve `stage` against `context`.
    ///
    /// `params` apply to the requested stage only; ancestors are requested
    /// without explicit parameters.
    pub async fn request(
        &self,
        stage: StageName,
        params: StageParams,
        context: &Context,
        options: RequestOptions,
    ) -> StageResult {
        let span = tracing::info_span!("stage_request", stage = %stage, generation = context.generation());
        self.resolve(stage, params, context, options)
            .instrument(span)
            .await
    }

    /// Drop Failed entries on `stage`'s ancestry, then request it again.
    pub async fn retry(
        &self,
        stage: StageName,
        params: StageParams,
        context: &Context,
        options: RequestOptions,
    ) -> StageResult {
        let ancestry = stage.ancestry();
        let evicted = self
            .cache
            .evict_failed(|key| ancestry.contains(&key.stage()))?;
        tracing::info!(stage = %stage, evicted, "retrying stage");
        self.request(stage, params, context, options).await
    }

    fn resolve<'a>(
        &'a self,
        stage: StageName,
        params: StageParams,
        context: &'a Context,
        options: RequestOptions,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let ancestors = stage.ancestors();
            let resolved = join_all(
                ancestors
                    .iter()
                    .map(|ancestor| self.resolve(*ancestor, StageParams::new(), context, options)),
            )
            .await;

            let mut inputs = StageInputs::new(params);
            for result in resolved {
                match result? {
                    StageOutcome::Ready(artifact) => {
                        inputs.ancestors.insert(artifact.stage, artifact);
                    }
                    StageOutcome::NotApplicable { reason, .. } => {
                        return Ok(StageOutcome::not_applicable(stage, reason));
                    }
                }
            }

            if let Some(reason) = stage.unmet_precondition(&inputs, context) {
                tracing::debug!(stage = %stage, reason = %reason, "stage not applicable");
                return Ok(StageOutcome::not_applicable(stage, reason));
            }

            let function = self.registry.get(stage)?;
            let key = StageKey::derive(stage, &inputs, context)?;
            let compute = compute_artifact(
                function,
                stage,
                inputs,
                context.clone(),
                Arc::clone(&self.broadcaster),
            );
            let read = self.cache.get_or_compute(key, options.timeout, compute).await?;
            tracing::debug!(stage = %stage, key = %key, source = ?read.source(), "stage resolved");
            Ok(StageOutcome::Ready(read.into_value()))
        })
    }
}

async fn compute_artifact(
    function: Arc<dyn StageFunction>,
    stage: StageName,
    inputs: StageInputs,
    context: Context,
    broadcaster: Arc<ProviderFailureBroadcaster>,
) -> PipelineResult<Arc<StageArtifact>> {
    match function.run(inputs, &context).await {
        Ok(output) if output.stage() == stage => StageArtifact::new(output).map(Arc::new),
        Ok(output) => Err(PipelineError::internal(format!(
            "{} function returned {} output",
            stage,
            output.stage()
        ))),
        Err(error) => {
            broadcaster.publish_error(context.provider_id(), NoticeSource::Stage(stage), &error);
            Err(error)
        }
    }
}

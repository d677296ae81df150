//! Pipeline facade.
//!
//! Wires the cache, context store, executor, ingestion gate, chat and
//! failure broadcaster together behind one handle. Share it with
//! `Arc<Pipeline>`; every method takes `&self`.

use riskalign_cache::{CacheConfig, CacheStats, StageCache};
use riskalign_core::{
    ArtifactParser, ChatBackend, Context, ContextPatch, ConversationState, PipelineConfig,
    PipelineError, PipelineResult, ProviderDirectory, RawArtifact, StageFunction, StageName,
    StageParams,
};
use std::sync::Arc;
use tokio::sync::watch;

use crate::batches::{BatchFindingsStage, BatchStore};
use crate::broadcaster::{FailureListener, ProviderFailureBroadcaster, ProviderNotice, SubscriptionToken};
use crate::chat::IntentChat;
use crate::context_store::{ContextChange, ContextStore};
use crate::executor::{Executor, RequestOptions, StageResult};
use crate::ingest::{IngestReport, IngestionGate};
use crate::preferences::{self, Preferences};
use crate::registry::StageRegistry;
use crate::ArtifactCache;

// ============================================================================
// BUILDER
// ============================================================================

pub struct PipelineBuilder {
    config: PipelineConfig,
    registry: StageRegistry,
    parser: Option<Arc<dyn ArtifactParser>>,
    chat: Option<Arc<dyn ChatBackend>>,
    cache_config: Option<CacheConfig>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: StageRegistry::new(),
            parser: None,
            chat: None,
            cache_config: None,
        }
    }

    pub fn with_stage(mut self, function: Arc<dyn StageFunction>) -> Self {
        self.registry.register(function);
        self
    }

    /// Register every function in `functions`.
    pub fn with_stages<I>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn StageFunction>>,
    {
        for function in functions {
            self.registry.register(function);
        }
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ArtifactParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat = Some(backend);
        self
    }

    /// Override the cache settings derived from the config.
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// Validate the config, load saved preferences and assemble the
    /// pipeline. `Findings` falls back to the local batch store when no
    /// function was registered for it.
    pub fn start(self) -> PipelineResult<Pipeline> {
        let PipelineBuilder {
            config,
            mut registry,
            parser,
            chat,
            cache_config,
        } = self;
        config.validate()?;

        let context = initial_context(&config);
        let cache: ArtifactCache = StageCache::new(
            cache_config
                .unwrap_or_else(|| CacheConfig::new().with_default_timeout(config.stage_timeout())),
        );
        let batches = Arc::new(BatchStore::new());
        if !registry.contains(StageName::Findings) {
            registry.register(Arc::new(BatchFindingsStage::new(Arc::clone(&batches))));
        }
        let missing = registry.missing();
        if !missing.is_empty() {
            tracing::warn!(stages = ?missing, "stages without a registered function");
        }

        let broadcaster = Arc::new(ProviderFailureBroadcaster::new());
        let context_store = Arc::new(ContextStore::new(context, cache.clone()));
        let executor = Executor::new(Arc::new(registry), cache.clone(), Arc::clone(&broadcaster));
        let ingest = parser.map(|parser| {
            IngestionGate::new(parser, Arc::clone(&batches), Arc::clone(&context_store))
                .with_preview_limit(config.preview_limit)
        });
        let chat = chat.map(|backend| IntentChat::new(backend, Arc::clone(&broadcaster)));

        let current = context_store.current();
        tracing::info!(
            provider = %current.provider_id(),
            max_hours_per_wave = current.max_hours_per_wave(),
            framework = %current.framework(),
            "pipeline started"
        );

        Ok(Pipeline {
            config,
            cache,
            batches,
            broadcaster,
            context: context_store,
            executor,
            ingest,
            chat,
        })
    }
}

fn initial_context(config: &PipelineConfig) -> Context {
    let Some(path) = config.preferences_path.as_deref() else {
        return config.initial_context();
    };
    match preferences::load(path) {
        Ok(Some(prefs)) if prefs.max_hours_per_wave > 0 && !prefs.framework.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "loaded preferences");
            Context::new(prefs.provider_id, prefs.max_hours_per_wave, prefs.framework)
        }
        Ok(Some(_)) => {
            tracing::warn!(path = %path.display(), "ignoring preferences with invalid values");
            config.initial_context()
        }
        Ok(None) => config.initial_context(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load preferences");
            config.initial_context()
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    cache: ArtifactCache,
    batches: Arc<BatchStore>,
    broadcaster: Arc<ProviderFailureBroadcaster>,
    context: Arc<ContextStore>,
    executor: Executor,
    ingest: Option<IngestionGate>,
    chat: Option<IntentChat>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> Context {
        self.context.current()
    }

    pub fn subscribe_context(&self) -> watch::Receiver<Context> {
        self.context.subscribe()
    }

    pub fn update_context(&self, patch: &ContextPatch) -> PipelineResult<ContextChange> {
        self.context.apply(patch)
    }

    /// Request `stage` against the current context snapshot.
    pub async fn request(&self, stage: StageName, params: StageParams) -> StageResult {
        self.request_with(stage, params, RequestOptions::default()).await
    }

    pub async fn request_with(
        &self,
        stage: StageName,
        params: StageParams,
        options: RequestOptions,
    ) -> StageResult {
        let context = self.context.current();
        self.executor.request(stage, params, &context, options).await
    }

    /// Drop Failed entries on `stage`'s ancestry and request it again.
    pub async fn retry(&self, stage: StageName, params: StageParams) -> StageResult {
        let context = self.context.current();
        self.executor
            .retry(stage, params, &context, RequestOptions::default())
            .await
    }

    pub async fn ingest(&self, artifact: RawArtifact) -> PipelineResult<IngestReport> {
        let gate = self
            .ingest
            .as_ref()
            .ok_or_else(|| PipelineError::internal("no artifact parser configured"))?;
        gate.ingest(artifact).await
    }

    pub async fn chat(&self, conversation: &ConversationState, prompt: &str) -> PipelineResult<ConversationState> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| PipelineError::internal("no chat backend configured"))?;
        let context = self.context.current();
        chat.send(conversation, prompt, &context).await
    }

    pub fn subscribe_failures(&self, listener: Arc<dyn FailureListener>) -> SubscriptionToken {
        self.broadcaster.subscribe(listener)
    }

    pub fn subscribe_failures_fn<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ProviderNotice) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe_fn(listener)
    }

    pub fn unsubscribe_failures(&self, token: SubscriptionToken) -> bool {
        self.broadcaster.unsubscribe(token)
    }

    pub fn batches(&self) -> &BatchStore {
        &self.batches
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> PipelineResult<CacheStats> {
        self.cache.stats()
    }

    /// Ask `directory` which providers are offered and fall back when the
    /// selected one is gone.
    pub async fn reconcile_provider(&self, directory: &dyn ProviderDirectory) -> PipelineResult<Option<ContextChange>> {
        let available = directory.list_providers().await;
        self.context.reconcile_provider(&available)
    }

    /// Persist preferences, if configured, and drop the pipeline.
    pub fn shutdown(self) -> PipelineResult<()> {
        let stats = self.cache.stats()?;
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            failures = stats.failures,
            hit_rate = stats.hit_rate(),
            "pipeline shutting down"
        );
        if let Some(path) = self.config.preferences_path.as_deref() {
            let prefs = Preferences::from_context(&self.context.current());
            preferences::save(path, &prefs)?;
            tracing::debug!(path = %path.display(), "saved preferences");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("context", &self.context.current())
            .field("registry", self.executor.registry())
            .field("batches", &self.batches.len())
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

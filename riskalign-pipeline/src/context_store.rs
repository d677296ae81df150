//! Context store.
//!
//! Holds the current [`Context`] snapshot and turns every update into the
//! matching cache invalidation. Updates are serialized by a bookkeeping
//! lock that is never held across a stage computation.

use riskalign_core::{
    Context, ContextFields, ContextPatch, PipelineError, PipelineResult, ProviderOption, StageName,
};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::ArtifactCache;

/// Outcome of a context update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChange {
    pub context: Context,
    pub changed: ContextFields,
    /// Stages whose cached entries were invalidated
    pub invalidated: Vec<StageName>,
}

impl ContextChange {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

fn validate_patch(patch: &ContextPatch) -> PipelineResult<()> {
    if patch.max_hours_per_wave == Some(0) {
        return Err(PipelineError::validation("context", "max_hours_per_wave must be > 0"));
    }
    if patch.framework.as_deref().is_some_and(|f| f.trim().is_empty()) {
        return Err(PipelineError::validation("context", "framework must not be empty"));
    }
    Ok(())
}

pub struct ContextStore {
    sender: watch::Sender<Context>,
    update_lock: Mutex<()>,
    cache: ArtifactCache,
}

impl ContextStore {
    pub fn new(initial: Context, cache: ArtifactCache) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            update_lock: Mutex::new(()),
            cache,
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Context {
        self.sender.borrow().clone()
    }

    /// Observe every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Context> {
        self.sender.subscribe()
    }

    /// Apply `patch` and return the resulting snapshot.
    pub fn update(&self, patch: &ContextPatch) -> PipelineResult<Context> {
        self.apply(patch).map(|change| change.context)
    }

    /// Apply `patch`, invalidate every cache entry that depended on a
    /// changed field (plus everything downstream), then publish the new
    /// snapshot.
    ///
    /// A provider change invalidates the whole cache. A zero wave budget or
    /// a blank framework is rejected and leaves everything untouched.
    pub fn apply(&self, patch: &ContextPatch) -> PipelineResult<ContextChange> {
        validate_patch(patch)?;
        let _guard = self
            .update_lock
            .lock()
            .map_err(|_| PipelineError::internal("context store lock poisoned"))?;

        let current = self.current();
        let (next, changed) = current.apply(patch);
        if changed.is_empty() {
            return Ok(ContextChange {
                context: current,
                changed,
                invalidated: Vec::new(),
            });
        }

        let affected = StageName::affected_by(changed);
        let entries = if changed.contains(ContextFields::PROVIDER) {
            self.cache.invalidate_all()?
        } else {
            self.cache.invalidate(|key| affected.contains(&key.stage()))?
        };

        tracing::info!(
            generation = next.generation(),
            changed = ?changed,
            stages = ?affected,
            entries,
            "context updated"
        );

        self.sender.send_replace(next.clone());
        Ok(ContextChange {
            context: next,
            changed,
            invalidated: affected.into_iter().collect(),
        })
    }

    /// Make sure the selected provider is one the service still offers,
    /// falling back to the first available option. Returns the change when
    /// the selection moved.
    pub fn reconcile_provider(&self, available: &[ProviderOption]) -> PipelineResult<Option<ContextChange>> {
        let current = self.current().provider_id();
        if available.is_empty() || available.iter().any(|option| option.id == current) {
            return Ok(None);
        }
        let fallback = available[0].id;
        tracing::info!(
            from = %current,
            to = %fallback,
            "selected AI provider is no longer offered"
        );
        self.apply(&ContextPatch::new().provider(fallback)).map(Some)
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("current", &*self.sender.borrow())
            .finish()
    }
}

//! Stage function registry.

use riskalign_core::{PipelineError, PipelineResult, StageFunction, StageName};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps each stage to the function that computes it.
#[derive(Clone, Default)]
pub struct StageRegistry {
    functions: BTreeMap<StageName, Arc<dyn StageFunction>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under the stage it reports, returning the
    /// function it replaced.
    pub fn register(&mut self, function: Arc<dyn StageFunction>) -> Option<Arc<dyn StageFunction>> {
        let stage = function.stage();
        tracing::debug!(stage = %stage, "registering stage function");
        self.functions.insert(stage, function)
    }

    pub fn with(mut self, function: Arc<dyn StageFunction>) -> Self {
        self.register(function);
        self
    }

    pub fn get(&self, stage: StageName) -> PipelineResult<Arc<dyn StageFunction>> {
        self.functions
            .get(&stage)
            .cloned()
            .ok_or(PipelineError::StageNotRegistered { stage })
    }

    pub fn contains(&self, stage: StageName) -> bool {
        self.functions.contains_key(&stage)
    }

    /// Stages with no registered function, in topological order.
    pub fn missing(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|stage| !self.contains(*stage))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

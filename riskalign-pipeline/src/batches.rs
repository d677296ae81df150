//! Batch store and the local findings stage.

use async_trait::async_trait;
use riskalign_core::{
    Batch, BatchId, Context, PipelineError, PipelineResult, StageFunction, StageInputs, StageName,
    StageOutput,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Every batch ingested during this process. Batches are never removed.
#[derive(Debug, Default)]
pub struct BatchStore {
    batches: RwLock<HashMap<BatchId, Arc<Batch>>>,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, batch: Batch) -> PipelineResult<Arc<Batch>> {
        let batch = Arc::new(batch);
        self.batches
            .write()
            .map_err(|_| PipelineError::internal("batch store lock poisoned"))?
            .insert(batch.id, Arc::clone(&batch));
        Ok(batch)
    }

    pub fn get(&self, id: BatchId) -> PipelineResult<Option<Arc<Batch>>> {
        Ok(self
            .batches
            .read()
            .map_err(|_| PipelineError::internal("batch store lock poisoned"))?
            .get(&id)
            .cloned())
    }

    /// All batches, newest first.
    pub fn list(&self) -> PipelineResult<Vec<Arc<Batch>>> {
        let mut batches: Vec<Arc<Batch>> = self
            .batches
            .read()
            .map_err(|_| PipelineError::internal("batch store lock poisoned"))?
            .values()
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(batches)
    }

    pub fn latest(&self) -> PipelineResult<Option<Arc<Batch>>> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn len(&self) -> usize {
        self.batches.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serves `Findings` from the batch store, for the context's active batch.
#[derive(Debug, Clone)]
pub struct BatchFindingsStage {
    store: Arc<BatchStore>,
}

impl BatchFindingsStage {
    pub fn new(store: Arc<BatchStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StageFunction for BatchFindingsStage {
    fn stage(&self) -> StageName {
        StageName::Findings
    }

    async fn run(&self, _inputs: StageInputs, context: &Context) -> PipelineResult<StageOutput> {
        let id = context
            .active_batch()
            .ok_or_else(|| PipelineError::validation("findings", "no active batch"))?;
        let batch = self
            .store
            .get(id)?
            .ok_or_else(|| PipelineError::validation("findings", format!("unknown batch {}", id)))?;
        Ok(StageOutput::Findings(batch.findings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskalign_core::ContextPatch;
    use riskalign_test_utils::fixtures;

    #[test]
    fn test_list_is_newest_first() {
        let store = BatchStore::new();
        let first = store.insert(Batch::new("a.json", None, fixtures::sample_findings())).unwrap();
        let second = store
            .insert(Batch::new("b.json", None, fixtures::follow_up_findings()))
            .unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(store.latest().unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_findings_come_from_active_batch() {
        let store = Arc::new(BatchStore::new());
        let batch = store.insert(Batch::new("a.json", None, fixtures::sample_findings())).unwrap();
        let stage = BatchFindingsStage::new(Arc::clone(&store));

        let (ctx, _) = Context::default().apply(&ContextPatch::new().active_batch(batch.id));
        let output = stage.run(StageInputs::default(), &ctx).await.unwrap();
        assert_eq!(output.as_findings().unwrap().len(), 5);

        let (unknown, _) = ctx.apply(&ContextPatch::new().active_batch(BatchId::new()));
        assert!(stage.run(StageInputs::default(), &unknown).await.is_err());
    }
}

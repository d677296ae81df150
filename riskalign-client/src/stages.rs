//! Stage functions backed by the analytics service.

use async_trait::async_trait;
use riskalign_core::{
    Context, PipelineError, PipelineResult, StageFunction, StageInputs, StageName, StageOutput,
};
use std::sync::Arc;

use crate::client::AnalyticsClient;

/// Computes one stage with a single request to the analytics service.
///
/// The service keeps no batches, so `Findings` has no remote function and
/// is answered by the pipeline's batch store.
#[derive(Debug, Clone)]
pub struct RemoteStage {
    client: AnalyticsClient,
    stage: StageName,
}

impl RemoteStage {
    pub fn new(client: AnalyticsClient, stage: StageName) -> Self {
        Self { client, stage }
    }
}

#[async_trait]
impl StageFunction for RemoteStage {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn run(&self, inputs: StageInputs, context: &Context) -> PipelineResult<StageOutput> {
        let provider = context.provider_id();
        let output = match self.stage {
            StageName::Findings => return Err(PipelineError::StageNotRegistered { stage: self.stage }),
            StageName::Scores => {
                StageOutput::Scores(self.client.compute_scores(inputs.findings()?, provider).await?)
            }
            StageName::Waves => StageOutput::Waves(
                self.client
                    .optimize_plan(inputs.scores()?, context.max_hours_per_wave(), provider)
                    .await?,
            ),
            StageName::ControlMappings => StageOutput::ControlMappings(
                self.client
                    .map_controls(inputs.findings()?, context.framework(), provider)
                    .await?,
            ),
            StageName::Impact => StageOutput::Impact(
                self.client
                    .estimate_impact(inputs.scores()?, inputs.waves()?, provider)
                    .await?,
            ),
            StageName::Summary => {
                StageOutput::Summary(self.client.generate_summary(inputs.findings()?, context).await?)
            }
        };
        Ok(output)
    }
}

impl AnalyticsClient {
    /// One remote function for every stage derived from findings.
    pub fn stage_functions(&self) -> Vec<Arc<dyn StageFunction>> {
        StageName::ALL
            .into_iter()
            .filter(|stage| *stage != StageName::Findings)
            .map(|stage| Arc::new(RemoteStage::new(self.clone(), stage)) as Arc<dyn StageFunction>)
            .collect()
    }
}

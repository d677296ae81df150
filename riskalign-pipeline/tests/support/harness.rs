//! Shared pipeline harness for integration tests.
#![allow(dead_code)]

use riskalign_core::{
    PipelineConfig, RawFinding, StageArtifact, StageFunction, StageName, StageParams,
};
use riskalign_pipeline::{IngestReport, Pipeline, ProviderNotice};
use riskalign_test_utils::{fixtures, MockArtifactParser, MockChatBackend, MockStageFunction};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A started pipeline whose derived stages are counting mocks and whose
/// findings come from the local batch store.
pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub mocks: BTreeMap<StageName, Arc<MockStageFunction>>,
    pub parser: Arc<MockArtifactParser>,
    pub chat: Arc<MockChatBackend>,
    notices: Arc<Mutex<Vec<ProviderNotice>>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(PipelineConfig::default(), MockChatBackend::new())
    }

    pub fn start_with(config: PipelineConfig, chat: MockChatBackend) -> Self {
        let mocks: BTreeMap<_, _> = fixtures::derived_stage_mocks()
            .into_iter()
            .map(|mock| (mock.stage(), mock))
            .collect();
        let parser = Arc::new(MockArtifactParser::new());
        let chat = Arc::new(chat);

        let mut builder = Pipeline::builder(config)
            .with_parser(parser.clone())
            .with_chat_backend(chat.clone());
        for mock in mocks.values() {
            builder = builder.with_stage(mock.clone());
        }
        let pipeline = builder.start().expect("pipeline starts");

        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        pipeline.subscribe_failures_fn(move |notice| sink.lock().unwrap().push(notice.clone()));

        Self {
            pipeline: Arc::new(pipeline),
            mocks,
            parser,
            chat,
            notices,
        }
    }

    pub fn mock(&self, stage: StageName) -> &MockStageFunction {
        self.mocks.get(&stage).expect("derived stage mock")
    }

    pub fn calls(&self, stage: StageName) -> usize {
        self.mock(stage).calls()
    }

    pub async fn ingest(&self, file_name: &str, findings: &[RawFinding]) -> IngestReport {
        self.pipeline
            .ingest(fixtures::findings_artifact(file_name, findings))
            .await
            .expect("ingest succeeds")
    }

    /// Request `stage` and insist it produced a value.
    pub async fn ready(&self, stage: StageName) -> Arc<StageArtifact> {
        self.pipeline
            .request(stage, StageParams::new())
            .await
            .expect("stage succeeds")
            .ready()
            .expect("stage applicable")
    }

    pub fn notices(&self) -> Vec<ProviderNotice> {
        self.notices.lock().unwrap().clone()
    }
}

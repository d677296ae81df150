//! REST client for the analytics service.

use reqwest::multipart::{Form, Part};
use riskalign_core::{
    ArtifactParser, ChatBackend, ChatReply, Context, ControlMappingSet,
    ConversationState, ImpactEstimate, ParsedArtifact, PipelineConfig, PipelineResult,
    ProviderDirectory, ProviderId, ProviderOption, RawArtifact, RawFinding, RemediationPlan,
    ScoreSet, SummaryDocument,
};
use std::time::Duration;

use crate::error::ClientError;
use crate::wire::{
    self, ImpactRequest, ImpactResponse, IngestResponse, MappingRequest, MappingResponse,
    OptimizePlanRequest, OptimizePlanResponse, ProvidersResponse, QueryRequest, QueryResponse,
    ScoreRequest, ScoreResponse, SummaryRequest, WireWave,
};

/// Header carrying the selected AI provider on every request.
pub const PROVIDER_HEADER: &str = "x-ai-provider";

/// Framework sent with impact requests. Impact does not depend on the
/// selected framework.
const IMPACT_FRAMEWORK: &str = riskalign_core::context::DEFAULT_FRAMEWORK;

#[derive(Clone)]
pub struct AnalyticsClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnalyticsClient {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Self::with_base_url(&config.api_base_url, config.request_timeout())
            .map_err(|e| e.into_pipeline("connect", config.default_provider))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // STAGES
    // ========================================================================

    /// The service's demo dataset. Uploaded batches are never read back;
    /// their findings stay in the pipeline's batch store.
    pub async fn fetch_sample_findings(&self, provider: ProviderId) -> PipelineResult<Vec<RawFinding>> {
        self.get_json::<Vec<RawFinding>, ()>(provider, "/api/findings/sample", None)
            .await
            .map_err(|e| e.into_pipeline("findings", provider))
    }

    pub async fn compute_scores(&self, findings: &[RawFinding], provider: ProviderId) -> PipelineResult<ScoreSet> {
        let response: ScoreResponse = self
            .post_json(provider, "/api/score/compute", &ScoreRequest { findings })
            .await
            .map_err(|e| e.into_pipeline("score", provider))?;
        Ok(response.into())
    }

    pub async fn optimize_plan(
        &self,
        scores: &ScoreSet,
        max_hours_per_wave: u32,
        provider: ProviderId,
    ) -> PipelineResult<RemediationPlan> {
        let request = OptimizePlanRequest {
            findings: wire::wire_scores(scores),
            max_hours_per_wave: f64::from(max_hours_per_wave),
        };
        let response: OptimizePlanResponse = self
            .post_json(provider, "/api/optimize/plan", &request)
            .await
            .map_err(|e| e.into_pipeline("optimize", provider))?;
        Ok(response.into_plan(scores))
    }

    pub async fn map_controls(
        &self,
        findings: &[RawFinding],
        framework: &str,
        provider: ProviderId,
    ) -> PipelineResult<ControlMappingSet> {
        let response: MappingResponse = self
            .post_json(provider, "/api/map/controls", &MappingRequest { findings, framework })
            .await
            .map_err(|e| e.into_pipeline("map", provider))?;
        Ok(response.into())
    }

    pub async fn estimate_impact(
        &self,
        scores: &ScoreSet,
        plan: &RemediationPlan,
        provider: ProviderId,
    ) -> PipelineResult<ImpactEstimate> {
        let request = ImpactRequest {
            findings: wire::wire_scores(scores),
            waves: plan.waves.iter().map(WireWave::from).collect(),
            framework: IMPACT_FRAMEWORK,
        };
        let response: ImpactResponse = self
            .post_json(provider, "/api/impact/estimate", &request)
            .await
            .map_err(|e| e.into_pipeline("impact", provider))?;
        Ok(response.into())
    }

    /// Render the executive summary for `findings`.
    pub async fn generate_summary(
        &self,
        findings: &[RawFinding],
        context: &Context,
    ) -> PipelineResult<SummaryDocument> {
        let provider = context.provider_id();
        let request = SummaryRequest {
            findings,
            waves: Vec::new(),
            notes: Some(format!(
                "Waves capped at {} hours per wave.",
                context.max_hours_per_wave()
            )),
        };
        self.post_json(provider, "/api/summary/generate", &request)
            .await
            .map_err(|e| e.into_pipeline("summary", provider))
    }

    // ========================================================================
    // INGEST, CHAT, PROVIDERS
    // ========================================================================

    /// Upload an artifact with multipart/form-data.
    pub async fn upload(&self, artifact: &RawArtifact, provider: ProviderId) -> PipelineResult<ParsedArtifact> {
        let url = format!("{}/api/ingest/upload", self.base_url);
        let part = Part::bytes(artifact.bytes.clone()).file_name(artifact.file_name.clone());
        let form = Form::new().part("file", part);

        let result: Result<IngestResponse, ClientError> = async {
            let response = self
                .client
                .post(url)
                .header(PROVIDER_HEADER, provider.as_str())
                .multipart(form)
                .send()
                .await?;
            self.parse_response(response).await
        }
        .await;

        let response = result.map_err(|e| e.into_pipeline("ingest", provider))?;
        tracing::debug!(file = %artifact.file_name, count = response.count, "artifact uploaded");
        Ok(response.into())
    }

    pub async fn query(
        &self,
        conversation: &ConversationState,
        prompt: &str,
        provider: ProviderId,
    ) -> PipelineResult<ChatReply> {
        let request = QueryRequest {
            query: prompt,
            context: serde_json::json!({
                "provider": provider.as_str(),
                "history": conversation.messages(),
            }),
        };
        let response: QueryResponse = self
            .post_json(provider, "/api/nl/query", &request)
            .await
            .map_err(|e| e.into_pipeline("chat", provider))?;
        Ok(response.into())
    }

    /// Providers the service currently offers, unknown ids skipped.
    pub async fn providers(&self) -> Result<Vec<ProviderOption>, ClientError> {
        let url = format!("{}/api/ai/providers", self.base_url);
        let response = self.client.get(url).send().await?;
        let body: ProvidersResponse = self.parse_response(response).await?;
        Ok(body.into_options())
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    async fn get_json<T, Q>(&self, provider: ProviderId, path: &str, query: Option<&Q>) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(url).header(PROVIDER_HEADER, provider.as_str());
        if let Some(query) = query {
            request = request.query(query);
        }
        tracing::debug!(path, provider = %provider, "GET");
        let response = request.send().await?;
        self.parse_response(response).await
    }

    async fn post_json<T, B>(&self, provider: ProviderId, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(path, provider = %provider, "POST");
        let response = self
            .client
            .post(url)
            .header(PROVIDER_HEADER, provider.as_str())
            .json(body)
            .send()
            .await?;
        self.parse_response(response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response.text().await?;
            Err(ClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl std::fmt::Debug for AnalyticsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ============================================================================
// BACKEND TRAITS
// ============================================================================

#[async_trait::async_trait]
impl ArtifactParser for AnalyticsClient {
    async fn parse(&self, artifact: &RawArtifact, context: &Context) -> PipelineResult<ParsedArtifact> {
        self.upload(artifact, context.provider_id()).await
    }
}

#[async_trait::async_trait]
impl ChatBackend for AnalyticsClient {
    async fn chat(
        &self,
        conversation: &ConversationState,
        prompt: &str,
        provider: ProviderId,
    ) -> PipelineResult<ChatReply> {
        self.query(conversation, prompt, provider).await
    }
}

#[async_trait::async_trait]
impl ProviderDirectory for AnalyticsClient {
    async fn list_providers(&self) -> Vec<ProviderOption> {
        match self.providers().await {
            Ok(options) if !options.is_empty() => options,
            Ok(_) => {
                tracing::warn!("service offered no known providers, using defaults");
                ProviderOption::defaults()
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to list providers, using defaults");
                ProviderOption::defaults()
            }
        }
    }
}

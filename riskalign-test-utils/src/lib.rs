//! RiskAlign Test Utilities
//!
//! Centralized test infrastructure for the RiskAlign workspace:
//! - Mock stage functions that count calls, fail on demand and compute
//!   deterministic outputs
//! - Mock ingestion parser, chat backend and provider directory
//! - Test fixtures for common scenarios
//! - Proptest generators for findings and context patches

// Re-export core types for convenience
pub use riskalign_core::{
    ArtifactParser, Batch, BatchId, ChatBackend, ChatReply, Context, ContextFields, ContextPatch,
    ControlMapping, ControlMappingSet, ConversationState, CurvePoint, ImpactEstimate,
    ParsedArtifact, PipelineError, PipelineResult, PlanItem, PlanTotals, ProviderDirectory,
    ProviderId, ProviderOption, RawArtifact, RawFinding, RemediationPlan, ScoreSet, ScoredFinding,
    StageFunction, StageInputs, StageName, StageOutput, SummaryDocument, Wave,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK STAGE FUNCTIONS
// ============================================================================

/// Deterministic stand-in for a remote stage function.
///
/// Counts invocations, records the context generation each call observed,
/// and can be told to fail or to sleep before answering.
#[derive(Debug)]
pub struct MockStageFunction {
    stage: StageName,
    calls: AtomicUsize,
    delay: Duration,
    failure: Mutex<Option<PipelineError>>,
    findings: Vec<RawFinding>,
    generations: Mutex<Vec<u64>>,
}

impl MockStageFunction {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            findings: Vec::new(),
            generations: Mutex::new(Vec::new()),
        }
    }

    /// A mock that fails every call with `error` until reset.
    pub fn failing(stage: StageName, error: PipelineError) -> Self {
        let mock = Self::new(stage);
        mock.set_failure(Some(error));
        mock
    }

    /// Findings returned by a `Findings` mock.
    pub fn with_findings(mut self, findings: Vec<RawFinding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failure(&self, failure: Option<PipelineError>) {
        *guard(&self.failure) = failure;
    }

    /// Number of times `run` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context generation seen by each call, in call order.
    pub fn observed_generations(&self) -> Vec<u64> {
        guard(&self.generations).clone()
    }

    fn compute(&self, inputs: &StageInputs, context: &Context) -> PipelineResult<StageOutput> {
        let output = match self.stage {
            StageName::Findings => StageOutput::Findings(self.findings.clone()),
            StageName::Scores => StageOutput::Scores(compute::scores(inputs.findings()?)),
            StageName::Waves => StageOutput::Waves(compute::plan(
                inputs.scores()?,
                context.max_hours_per_wave(),
            )),
            StageName::ControlMappings => StageOutput::ControlMappings(compute::controls(
                inputs.findings()?,
                context.framework(),
            )),
            StageName::Impact => {
                StageOutput::Impact(compute::impact(inputs.scores()?, inputs.waves()?))
            }
            StageName::Summary => StageOutput::Summary(compute::summary(inputs.findings()?, context)),
        };
        Ok(output)
    }
}

#[async_trait]
impl StageFunction for MockStageFunction {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn run(&self, inputs: StageInputs, context: &Context) -> PipelineResult<StageOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.generations).push(context.generation());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = guard(&self.failure).clone() {
            return Err(error);
        }
        self.compute(&inputs, context)
    }
}

/// Reference computations used by the mock stages.
pub mod compute {
    use super::*;

    pub fn priority_for(score: f64) -> &'static str {
        if score >= 9.0 {
            "Critical"
        } else if score >= 7.0 {
            "High"
        } else if score >= 4.0 {
            "Medium"
        } else {
            "Low"
        }
    }

    pub fn scores(findings: &[RawFinding]) -> ScoreSet {
        let scored = findings
            .iter()
            .map(|finding| {
                let mut score = finding.cvss.unwrap_or(5.0) + finding.epss.unwrap_or(0.0);
                if finding.kev {
                    score += 1.0;
                }
                let score = (score.min(10.0) * 10.0).round() / 10.0;
                ScoredFinding {
                    finding_id: finding.id.clone(),
                    title: finding.title.clone(),
                    score,
                    priority: priority_for(score).to_string(),
                    effort_hours: finding.effort_hours.unwrap_or(2.0),
                    risk_saved: score,
                }
            })
            .collect();
        ScoreSet::from_findings(scored)
    }

    /// First-fit-decreasing packing by score.
    pub fn plan(scores: &ScoreSet, max_hours_per_wave: u32) -> RemediationPlan {
        let capacity = f64::from(max_hours_per_wave);
        let mut ordered: Vec<&ScoredFinding> = scores.findings.iter().collect();
        ordered.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.finding_id.cmp(&b.finding_id))
        });

        let mut waves: Vec<Wave> = Vec::new();
        let mut unassigned = Vec::new();
        for finding in ordered {
            let item = PlanItem {
                finding_id: finding.finding_id.clone(),
                title: finding.title.clone(),
                priority: finding.priority.clone(),
                effort_hours: finding.effort_hours,
                score: finding.score,
                risk_saved: finding.risk_saved,
            };
            if item.effort_hours > capacity {
                unassigned.push(item);
                continue;
            }
            match waves
                .iter_mut()
                .find(|wave| wave.total_hours + item.effort_hours <= capacity)
            {
                Some(wave) => {
                    wave.total_hours += item.effort_hours;
                    wave.risk_saved += item.risk_saved;
                    wave.items.push(item);
                }
                None => waves.push(Wave {
                    name: format!("Wave {}", waves.len() + 1),
                    total_hours: item.effort_hours,
                    risk_saved: item.risk_saved,
                    items: vec![item],
                }),
            }
        }

        let totals = PlanTotals {
            waves: waves.len(),
            total_hours: waves.iter().map(|w| w.total_hours).sum(),
            total_risk_saved: waves.iter().map(|w| w.risk_saved).sum(),
        };
        RemediationPlan {
            waves,
            totals,
            unassigned,
        }
    }

    pub fn controls(findings: &[RawFinding], framework: &str) -> ControlMappingSet {
        let mut mappings = Vec::new();
        let mut unmapped = Vec::new();
        for (idx, finding) in findings.iter().enumerate() {
            if finding.cve.is_none() {
                unmapped.push(finding.id.clone());
                continue;
            }
            let control = format!("{}-{}", framework, idx % 6 + 1);
            mappings.push(ControlMapping {
                title: format!("{} control for {}", framework, finding.title),
                description: String::new(),
                finding_id: finding.id.clone(),
                cve: finding.cve.clone(),
                control,
            });
        }
        let mut controls: Vec<&str> = mappings.iter().map(|m| m.control.as_str()).collect();
        controls.sort_unstable();
        controls.dedup();
        ControlMappingSet {
            framework: framework.to_string(),
            coverage: if findings.is_empty() {
                0.0
            } else {
                mappings.len() as f64 / findings.len() as f64
            },
            unique_controls: controls.len(),
            mappings,
            unmapped,
        }
    }

    pub fn impact(scores: &ScoreSet, plan: &RemediationPlan) -> ImpactEstimate {
        let total = scores.totals.total_score;
        let mut cumulative = 0.0;
        let risk_saved_curve = plan
            .waves
            .iter()
            .map(|wave| {
                cumulative += wave.risk_saved;
                CurvePoint {
                    wave: wave.name.clone(),
                    cumulative_risk_saved: cumulative,
                    percent_of_total: if total > 0.0 { cumulative / total * 100.0 } else { 0.0 },
                }
            })
            .collect();
        let readiness_percent = if total > 0.0 {
            plan.totals.total_risk_saved / total * 100.0
        } else {
            0.0
        };
        ImpactEstimate {
            readiness_percent,
            compliance_boost: readiness_percent * 0.4,
            residual_risk: (total - plan.totals.total_risk_saved).max(0.0),
            risk_saved_curve,
            controls_covered: 0,
        }
    }

    pub fn summary(findings: &[RawFinding], context: &Context) -> SummaryDocument {
        SummaryDocument {
            path: format!("reports/summary-{}.html", findings.len()),
            html: format!(
                "<h1>Executive summary</h1><p>{} findings planned in {}h waves via {}</p>",
                findings.len(),
                context.max_hours_per_wave(),
                context.provider_id()
            ),
        }
    }
}

// ============================================================================
// MOCK INGESTION PARSER
// ============================================================================

/// Parses a JSON array of findings; invalid records are counted as rejected.
#[derive(Debug, Default)]
pub struct MockArtifactParser {
    calls: AtomicUsize,
}

impl MockArtifactParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactParser for MockArtifactParser {
    async fn parse(&self, artifact: &RawArtifact, _context: &Context) -> PipelineResult<ParsedArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records: Vec<serde_json::Value> = serde_json::from_slice(&artifact.bytes).map_err(|e| {
            PipelineError::validation("ingest", format!("not a findings document: {}", e))
        })?;

        let mut parsed = ParsedArtifact {
            location: Some(format!("memory://uploads/{}", artifact.file_name)),
            ..ParsedArtifact::default()
        };
        for record in records {
            match serde_json::from_value::<RawFinding>(record) {
                Ok(finding) if finding.is_valid() => parsed.accepted.push(finding),
                _ => parsed.rejected += 1,
            }
        }
        Ok(parsed)
    }
}

// ============================================================================
// MOCK CHAT BACKEND
// ============================================================================

#[derive(Debug, Default)]
pub struct MockChatBackend {
    calls: AtomicUsize,
    provider_error: Option<String>,
    failure: Mutex<Option<PipelineError>>,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies still arrive but carry a degraded-provider note.
    pub fn with_provider_error(mut self, message: impl Into<String>) -> Self {
        self.provider_error = Some(message.into());
        self
    }

    pub fn failing(error: PipelineError) -> Self {
        let backend = Self::default();
        *guard(&backend.failure) = Some(error);
        backend
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn intent_for(prompt: &str) -> &'static str {
        let prompt = prompt.to_ascii_lowercase();
        if prompt.contains("plan") || prompt.contains("wave") {
            "plan"
        } else if prompt.contains("score") || prompt.contains("risk") {
            "score"
        } else {
            "summary"
        }
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn chat(
        &self,
        conversation: &ConversationState,
        prompt: &str,
        provider: ProviderId,
    ) -> PipelineResult<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = guard(&self.failure).clone() {
            return Err(error);
        }
        let intent = Self::intent_for(prompt);
        Ok(ChatReply {
            content: format!("[{}] {} (turn {})", provider, intent, conversation.len() / 2 + 1),
            intent: intent.to_string(),
            provider: Some(provider.to_string()),
            provider_error: self.provider_error.clone(),
        })
    }
}

// ============================================================================
// MOCK PROVIDER DIRECTORY
// ============================================================================

#[derive(Debug, Clone)]
pub struct MockProviderDirectory {
    options: Vec<ProviderOption>,
}

impl MockProviderDirectory {
    pub fn new(options: Vec<ProviderOption>) -> Self {
        Self { options }
    }

    pub fn only(provider: ProviderId) -> Self {
        Self::new(vec![ProviderOption {
            id: provider,
            label: provider.label().to_string(),
        }])
    }
}

#[async_trait]
impl ProviderDirectory for MockProviderDirectory {
    async fn list_providers(&self) -> Vec<ProviderOption> {
        if self.options.is_empty() {
            ProviderOption::defaults()
        } else {
            self.options.clone()
        }
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Five findings totalling 20 remediation hours.
    pub fn sample_findings() -> Vec<RawFinding> {
        vec![
            RawFinding::new("F-101", "OpenSSL heap overflow on edge proxy")
                .with_cve("CVE-2024-5535")
                .with_cvss(9.8)
                .with_kev(true)
                .with_effort_hours(3.0),
            RawFinding::new("F-102", "Outdated Apache Struts on billing portal")
                .with_cve("CVE-2023-50164")
                .with_cvss(9.1)
                .with_effort_hours(5.0),
            RawFinding::new("F-103", "SMBv1 enabled on file server")
                .with_cvss(7.5)
                .with_effort_hours(2.0),
            RawFinding::new("F-104", "Weak TLS ciphers on VPN gateway")
                .with_cve("CVE-2016-2183")
                .with_cvss(5.3)
                .with_effort_hours(6.0),
            RawFinding::new("F-105", "Default SNMP community string")
                .with_cvss(4.0)
                .with_effort_hours(4.0),
        ]
    }

    /// Three findings with ids disjoint from [`sample_findings`].
    pub fn follow_up_findings() -> Vec<RawFinding> {
        vec![
            RawFinding::new("G-201", "Exposed Redis without auth")
                .with_cvss(8.6)
                .with_effort_hours(1.0),
            RawFinding::new("G-202", "Log4Shell in reporting service")
                .with_cve("CVE-2021-44228")
                .with_cvss(10.0)
                .with_kev(true)
                .with_effort_hours(8.0),
            RawFinding::new("G-203", "Stale admin accounts in AD")
                .with_cvss(6.1)
                .with_effort_hours(3.0),
        ]
    }

    pub fn findings_artifact(file_name: &str, findings: &[RawFinding]) -> RawArtifact {
        RawArtifact::new(file_name, serde_json::to_vec(findings).unwrap_or_default())
    }

    pub fn empty_artifact() -> RawArtifact {
        RawArtifact::new("empty.json", Vec::new())
    }

    pub fn garbage_artifact() -> RawArtifact {
        RawArtifact::new("scan.bin", b"\x00\x01not json at all".to_vec())
    }

    /// Well-formed document whose every record fails validation.
    pub fn invalid_records_artifact() -> RawArtifact {
        RawArtifact::new(
            "invalid.json",
            br#"[{"id":"","title":"no id"},{"id":"X-1","title":"  "},{"title":"missing id"}]"#.to_vec(),
        )
    }

    /// One mock per derived stage (everything except `Findings`).
    pub fn derived_stage_mocks() -> Vec<std::sync::Arc<MockStageFunction>> {
        StageName::ALL
            .into_iter()
            .filter(|stage| *stage != StageName::Findings)
            .map(|stage| std::sync::Arc::new(MockStageFunction::new(stage)))
            .collect()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating RiskAlign data.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_provider_id() -> impl Strategy<Value = ProviderId> {
        prop_oneof![Just(ProviderId::Local), Just(ProviderId::Online)]
    }

    pub fn arb_stage_name() -> impl Strategy<Value = StageName> {
        proptest::sample::select(StageName::ALL.to_vec())
    }

    pub fn arb_framework() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("CIS".to_string()),
            Just("NIST".to_string()),
            Just("ISO27001".to_string())
        ]
    }

    /// Generate a valid finding.
    pub fn arb_raw_finding() -> impl Strategy<Value = RawFinding> {
        (
            "[A-Z]-[0-9]{3,5}",
            "[a-zA-Z][a-zA-Z ]{4,40}",
            proptest::option::of(0.0f64..=10.0),
            proptest::option::of(0.0f64..=1.0),
            any::<bool>(),
            proptest::option::of(0.5f64..12.0),
        )
            .prop_map(|(id, title, cvss, epss, kev, effort_hours)| {
                let mut finding = RawFinding::new(id, title).with_kev(kev);
                finding.cvss = cvss;
                finding.epss = epss;
                finding.effort_hours = effort_hours;
                finding
            })
    }

    pub fn arb_findings(max: usize) -> impl Strategy<Value = Vec<RawFinding>> {
        proptest::collection::vec(arb_raw_finding(), 1..=max.max(1))
    }

    /// Patch touching any subset of provider, capacity and framework.
    pub fn arb_context_patch() -> impl Strategy<Value = ContextPatch> {
        (
            proptest::option::of(arb_provider_id()),
            proptest::option::of(1u32..=40),
            proptest::option::of(arb_framework()),
        )
            .prop_map(|(provider_id, max_hours_per_wave, framework)| ContextPatch {
                provider_id,
                max_hours_per_wave,
                framework,
                active_batch: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn inputs_with(output: StageOutput) -> StageInputs {
        let artifact = riskalign_core::StageArtifact::new(output).unwrap();
        StageInputs::default().with_ancestor(Arc::new(artifact))
    }

    #[test]
    fn test_sample_findings_are_valid() {
        let findings = fixtures::sample_findings();
        assert_eq!(findings.len(), 5);
        assert!(findings.iter().all(RawFinding::is_valid));
        let hours: f64 = findings.iter().filter_map(|f| f.effort_hours).sum();
        assert_eq!(hours, 20.0);
    }

    #[test]
    fn test_plan_respects_capacity() {
        let scores = compute::scores(&fixtures::sample_findings());
        let plan = compute::plan(&scores, 8);
        assert!(plan.waves.len() >= 3);
        assert!(plan.waves.iter().all(|w| w.total_hours <= 8.0));
        assert!(plan.unassigned.is_empty());

        let tight = compute::plan(&scores, 4);
        assert_eq!(tight.unassigned.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_stage_counts_and_fails() {
        let mock = MockStageFunction::new(StageName::Scores);
        let inputs = inputs_with(StageOutput::Findings(fixtures::sample_findings()));
        let ctx = Context::default();

        let output = mock.run(inputs.clone(), &ctx).await.unwrap();
        assert_eq!(output.as_scores().unwrap().findings.len(), 5);

        mock.set_failure(Some(PipelineError::network("scores", "reset")));
        assert!(mock.run(inputs, &ctx).await.is_err());
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.observed_generations(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_mock_parser_counts_rejections() {
        let parser = MockArtifactParser::new();
        let ctx = Context::default();

        let parsed = parser
            .parse(&fixtures::invalid_records_artifact(), &ctx)
            .await
            .unwrap();
        assert!(parsed.accepted.is_empty());
        assert_eq!(parsed.rejected, 3);

        assert!(parser.parse(&fixtures::garbage_artifact(), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_chat_intents() {
        let chat = MockChatBackend::new();
        let reply = chat
            .chat(&ConversationState::new(), "Show me the wave plan", ProviderId::Online)
            .await
            .unwrap();
        assert_eq!(reply.intent, "plan");
        assert!(reply.content.starts_with("[online]"));
        assert!(reply.provider_error.is_none());
    }
}

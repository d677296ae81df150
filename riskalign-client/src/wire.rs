//! Request and response bodies of the analytics service, and their
//! conversions into the core data model.

use riskalign_core::{
    ChatReply, ControlMapping, ControlMappingSet, CurvePoint, ImpactEstimate, ParsedArtifact,
    PlanItem, PlanTotals, ProviderId, ProviderOption, RawFinding, RemediationPlan, ScoreSet,
    ScoreTotals, ScoredFinding, Wave,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_priority() -> String {
    "Low".to_string()
}

// ============================================================================
// SCORES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireScoredFinding {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub effort_hours: f64,
    #[serde(default)]
    pub risk_saved: f64,
}

impl From<WireScoredFinding> for ScoredFinding {
    fn from(wire: WireScoredFinding) -> Self {
        Self {
            finding_id: wire.id,
            title: wire.title,
            score: wire.score,
            priority: wire.priority,
            effort_hours: wire.effort_hours,
            risk_saved: wire.risk_saved,
        }
    }
}

impl From<&ScoredFinding> for WireScoredFinding {
    fn from(finding: &ScoredFinding) -> Self {
        Self {
            id: finding.finding_id.clone(),
            title: finding.title.clone(),
            score: finding.score,
            priority: finding.priority.clone(),
            effort_hours: finding.effort_hours,
            risk_saved: finding.risk_saved,
        }
    }
}

pub fn wire_scores(scores: &ScoreSet) -> Vec<WireScoredFinding> {
    scores.findings.iter().map(WireScoredFinding::from).collect()
}

#[derive(Debug, Serialize)]
pub struct ScoreRequest<'a> {
    pub findings: &'a [RawFinding],
}

#[derive(Debug, Deserialize)]
pub struct ScoreResponse {
    #[serde(default)]
    pub findings: Vec<WireScoredFinding>,
    #[serde(default)]
    pub totals: Option<ScoreTotals>,
}

impl From<ScoreResponse> for ScoreSet {
    fn from(response: ScoreResponse) -> Self {
        let findings: Vec<ScoredFinding> = response.findings.into_iter().map(Into::into).collect();
        match response.totals {
            Some(totals) if totals.count == findings.len() => ScoreSet { findings, totals },
            _ => ScoreSet::from_findings(findings),
        }
    }
}

// ============================================================================
// PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePlanItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub effort_hours: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub risk_saved: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWave {
    pub name: String,
    #[serde(default)]
    pub total_hours: f64,
    #[serde(default)]
    pub risk_saved: f64,
    #[serde(default)]
    pub items: Vec<WirePlanItem>,
}

impl From<&Wave> for WireWave {
    fn from(wave: &Wave) -> Self {
        Self {
            name: wave.name.clone(),
            total_hours: wave.total_hours,
            risk_saved: wave.risk_saved,
            items: wave
                .items
                .iter()
                .map(|item| WirePlanItem {
                    id: Some(item.finding_id.clone()),
                    title: Some(item.title.clone()),
                    priority: item.priority.clone(),
                    effort_hours: item.effort_hours,
                    score: item.score,
                    risk_saved: item.risk_saved,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OptimizePlanRequest {
    pub findings: Vec<WireScoredFinding>,
    pub max_hours_per_wave: f64,
}

#[derive(Debug, Deserialize)]
pub struct OptimizePlanResponse {
    #[serde(default)]
    pub waves: Vec<WireWave>,
    #[serde(default)]
    pub totals: Option<PlanTotals>,
    /// Ids of findings that fit in no wave
    #[serde(default)]
    pub unassigned: Vec<String>,
}

impl OptimizePlanResponse {
    /// Convert, resolving unassigned ids against the scores that were planned.
    pub fn into_plan(self, scores: &ScoreSet) -> RemediationPlan {
        let by_id: HashMap<&str, &ScoredFinding> = scores
            .findings
            .iter()
            .map(|f| (f.finding_id.as_str(), f))
            .collect();

        let waves: Vec<Wave> = self
            .waves
            .into_iter()
            .map(|wave| Wave {
                name: wave.name,
                total_hours: wave.total_hours,
                risk_saved: wave.risk_saved,
                items: wave
                    .items
                    .into_iter()
                    .map(|item| PlanItem {
                        finding_id: item.id.unwrap_or_default(),
                        title: item.title.unwrap_or_default(),
                        priority: item.priority,
                        effort_hours: item.effort_hours,
                        score: item.score,
                        risk_saved: item.risk_saved,
                    })
                    .collect(),
            })
            .collect();

        let unassigned = self
            .unassigned
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|f| PlanItem {
                finding_id: f.finding_id.clone(),
                title: f.title.clone(),
                priority: f.priority.clone(),
                effort_hours: f.effort_hours,
                score: f.score,
                risk_saved: f.risk_saved,
            })
            .collect();

        let totals = self.totals.unwrap_or_else(|| PlanTotals {
            waves: waves.len(),
            total_hours: waves.iter().map(|w| w.total_hours).sum(),
            total_risk_saved: waves.iter().map(|w| w.risk_saved).sum(),
        });

        RemediationPlan {
            waves,
            totals,
            unassigned,
        }
    }
}

// ============================================================================
// CONTROL MAPPINGS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MappingRequest<'a> {
    pub findings: &'a [RawFinding],
    pub framework: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct WireControlMapping {
    pub control: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub finding_id: Option<String>,
    #[serde(default)]
    pub cve: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MappingResponse {
    pub framework: String,
    /// Percentage, 0-100
    #[serde(default)]
    pub coverage: f64,
    #[serde(default)]
    pub unique_controls: Vec<String>,
    #[serde(default)]
    pub mappings: Vec<WireControlMapping>,
    #[serde(default)]
    pub unmapped: Vec<String>,
}

impl From<MappingResponse> for ControlMappingSet {
    fn from(response: MappingResponse) -> Self {
        Self {
            framework: response.framework,
            coverage: (response.coverage / 100.0).clamp(0.0, 1.0),
            unique_controls: response.unique_controls.len(),
            mappings: response
                .mappings
                .into_iter()
                .map(|m| ControlMapping {
                    control: m.control,
                    title: m.title,
                    description: m.description,
                    finding_id: m.finding_id.unwrap_or_default(),
                    cve: m.cve,
                })
                .collect(),
            unmapped: response.unmapped,
        }
    }
}

// ============================================================================
// IMPACT
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ImpactRequest<'a> {
    pub findings: Vec<WireScoredFinding>,
    pub waves: Vec<WireWave>,
    pub framework: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ImpactResponse {
    #[serde(default)]
    pub readiness_percent: f64,
    #[serde(default)]
    pub compliance_boost: f64,
    #[serde(default)]
    pub residual_risk: f64,
    #[serde(default)]
    pub risk_saved_curve: Vec<CurvePoint>,
    #[serde(default)]
    pub controls_covered: Vec<String>,
}

impl From<ImpactResponse> for ImpactEstimate {
    fn from(response: ImpactResponse) -> Self {
        Self {
            readiness_percent: response.readiness_percent,
            compliance_boost: response.compliance_boost,
            residual_risk: response.residual_risk,
            risk_saved_curve: response.risk_saved_curve,
            controls_covered: response.controls_covered.len(),
        }
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SummaryRequest<'a> {
    pub findings: &'a [RawFinding],
    pub waves: Vec<WireWave>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ============================================================================
// INGEST
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct EnvelopePayload {
    #[serde(default)]
    pub findings: Vec<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IngestEnvelope {
    #[serde(default)]
    pub payload: EnvelopePayload,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct IngestResponse {
    pub count: usize,
    #[serde(default)]
    pub sample: Vec<serde_json::Value>,
    #[serde(default)]
    pub envelope: IngestEnvelope,
}

impl From<IngestResponse> for ParsedArtifact {
    fn from(response: IngestResponse) -> Self {
        let records = if response.envelope.payload.findings.is_empty() {
            response.sample
        } else {
            response.envelope.payload.findings
        };
        let location = response
            .envelope
            .metadata
            .get("path")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut parsed = ParsedArtifact {
            location,
            ..ParsedArtifact::default()
        };
        for record in records {
            match serde_json::from_value::<RawFinding>(record) {
                Ok(finding) if finding.is_valid() => parsed.accepted.push(finding),
                _ => parsed.rejected += 1,
            }
        }
        parsed
    }
}

// ============================================================================
// CHAT
// ============================================================================

#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
    pub context: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryDetails {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub intent: String,
    pub response: String,
    #[serde(default)]
    pub details: QueryDetails,
}

impl From<QueryResponse> for ChatReply {
    fn from(response: QueryResponse) -> Self {
        Self {
            content: response.response,
            intent: response.intent,
            provider: response.details.provider,
            provider_error: response
                .details
                .provider_error
                .filter(|e| !e.trim().is_empty()),
        }
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WireProviderOption {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProvidersResponse {
    #[serde(default)]
    pub providers: Vec<WireProviderOption>,
}

impl ProvidersResponse {
    /// Known providers, in the order offered. Unknown ids are skipped.
    pub fn into_options(self) -> Vec<ProviderOption> {
        self.providers
            .into_iter()
            .filter_map(|option| {
                let id: ProviderId = option.id.parse().ok()?;
                Some(ProviderOption {
                    id,
                    label: option.label.unwrap_or_else(|| id.label().to_string()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scores() -> ScoreSet {
        let response: ScoreResponse = serde_json::from_value(json!({
            "findings": [
                {"id": "F-1", "title": "Log4Shell", "score": 9.6, "priority": "Critical",
                 "effort_hours": 4.0, "risk_saved": 9.6, "components": {"cvss": 5.8}},
                {"id": "F-2", "title": "Weak TLS", "score": 4.1, "priority": "Medium",
                 "effort_hours": 20.0, "risk_saved": 4.1}
            ],
            "totals": {"count": 2, "total_score": 13.7, "average_score": 6.85,
                       "total_effort_hours": 24.0, "by_priority": {"Critical": 1, "Medium": 1}}
        }))
        .unwrap();
        response.into()
    }

    #[test]
    fn test_score_response_ignores_unknown_fields() {
        let set = scores();
        assert_eq!(set.findings.len(), 2);
        assert_eq!(set.findings[0].finding_id, "F-1");
        assert_eq!(set.totals.by_priority.get("Critical"), Some(&1));
    }

    #[test]
    fn test_score_totals_rederived_when_inconsistent() {
        let response: ScoreResponse = serde_json::from_value(json!({
            "findings": [{"id": "F-1", "title": "x", "score": 5.0}]
        }))
        .unwrap();
        let set: ScoreSet = response.into();
        assert_eq!(set.totals.count, 1);
        assert_eq!(set.findings[0].priority, "Low");
    }

    #[test]
    fn test_plan_resolves_unassigned_ids() {
        let response: OptimizePlanResponse = serde_json::from_value(json!({
            "waves": [{"name": "Wave 1", "total_hours": 4.0, "risk_saved": 9.6,
                       "items": [{"id": "F-1", "title": "Log4Shell", "priority": "Critical",
                                  "effort_hours": 4.0, "score": 9.6, "risk_saved": 9.6}]}],
            "totals": {"waves": 1, "total_hours": 4.0, "total_risk_saved": 9.6},
            "unassigned": ["F-2", "F-unknown"]
        }))
        .unwrap();

        let plan = response.into_plan(&scores());
        assert_eq!(plan.waves.len(), 1);
        assert_eq!(plan.waves[0].items[0].finding_id, "F-1");
        assert_eq!(plan.unassigned.len(), 1);
        assert_eq!(plan.unassigned[0].effort_hours, 20.0);
    }

    #[test]
    fn test_mapping_coverage_becomes_fraction() {
        let response: MappingResponse = serde_json::from_value(json!({
            "framework": "CIS",
            "coverage": 40.0,
            "unique_controls": ["CIS-7.1", "CIS-4.8"],
            "mappings": [{"control": "CIS-7.1", "title": "Vulnerability management", "finding_id": "F-1"}],
            "unmapped": ["F-2"]
        }))
        .unwrap();
        let set: ControlMappingSet = response.into();
        assert!((set.coverage - 0.4).abs() < f64::EPSILON);
        assert_eq!(set.unique_controls, 2);
        assert_eq!(set.mappings[0].finding_id, "F-1");
    }

    #[test]
    fn test_ingest_prefers_full_payload_over_sample() {
        let response: IngestResponse = serde_json::from_value(json!({
            "count": 3,
            "sample": [{"id": "A-1", "title": "first"}],
            "envelope": {
                "intent": "ingest",
                "payload": {"source": "scan.csv", "findings": [
                    {"id": "A-1", "title": "first"},
                    {"id": "A-2", "title": "second", "cvss_score": 7.2},
                    {"id": "A-3", "title": "bad", "cvss": 42.0}
                ]},
                "metadata": {"count": 3}
            }
        }))
        .unwrap();
        let parsed: ParsedArtifact = response.into();
        assert_eq!(parsed.accepted.len(), 2);
        assert_eq!(parsed.accepted[1].cvss, Some(7.2));
        assert_eq!(parsed.rejected, 1);
        assert_eq!(parsed.location, None);
    }

    #[test]
    fn test_query_reply_carries_provider_error() {
        let response: QueryResponse = serde_json::from_value(json!({
            "intent": "plan",
            "response": "Here is your plan.",
            "details": {"provider": "online", "provider_error": "OpenAI quota exceeded",
                        "confidence": 0.8}
        }))
        .unwrap();
        let reply: ChatReply = response.into();
        assert_eq!(reply.content, "Here is your plan.");
        assert_eq!(reply.provider_error.as_deref(), Some("OpenAI quota exceeded"));
    }

    #[test]
    fn test_unknown_providers_skipped() {
        let response: ProvidersResponse = serde_json::from_value(json!({
            "providers": [{"id": "online", "label": "OpenAI"}, {"id": "anthropic", "label": "?"}]
        }))
        .unwrap();
        let options = response.into_options();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, ProviderId::Online);
        assert_eq!(options[0].label, "OpenAI");
    }
}

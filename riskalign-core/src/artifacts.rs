//! Derived stage outputs.
//!
//! Shapes follow the analytics service's JSON responses. Every map is a
//! `BTreeMap` so that canonical encodings (and therefore fingerprints) do
//! not depend on insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Fingerprint, PipelineResult, RawFinding, StageName};

// ============================================================================
// SCORES
// ============================================================================

/// A finding after risk scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFinding {
    pub finding_id: String,
    pub title: String,
    /// Composite risk score (0-10)
    pub score: f64,
    /// Priority bucket such as Critical, High, Medium, Low
    pub priority: String,
    #[serde(default)]
    pub effort_hours: f64,
    /// Risk removed by remediating this finding
    #[serde(default)]
    pub risk_saved: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTotals {
    pub count: usize,
    pub total_score: f64,
    pub average_score: f64,
    pub total_effort_hours: f64,
    #[serde(default)]
    pub by_priority: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub findings: Vec<ScoredFinding>,
    #[serde(default)]
    pub totals: ScoreTotals,
}

impl ScoreSet {
    /// Build a set and derive its totals from the scored findings.
    pub fn from_findings(findings: Vec<ScoredFinding>) -> Self {
        let count = findings.len();
        let total_score: f64 = findings.iter().map(|f| f.score).sum();
        let total_effort_hours = findings.iter().map(|f| f.effort_hours).sum();
        let mut by_priority = BTreeMap::new();
        for finding in &findings {
            *by_priority.entry(finding.priority.clone()).or_insert(0) += 1;
        }
        Self {
            totals: ScoreTotals {
                count,
                total_score,
                average_score: if count == 0 { 0.0 } else { total_score / count as f64 },
                total_effort_hours,
                by_priority,
            },
            findings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

// ============================================================================
// REMEDIATION PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub finding_id: String,
    pub title: String,
    pub priority: String,
    pub effort_hours: f64,
    pub score: f64,
    #[serde(default)]
    pub risk_saved: f64,
}

/// One capacity-bounded remediation wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub name: String,
    pub total_hours: f64,
    #[serde(default)]
    pub risk_saved: f64,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanTotals {
    pub waves: usize,
    pub total_hours: f64,
    pub total_risk_saved: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub waves: Vec<Wave>,
    #[serde(default)]
    pub totals: PlanTotals,
    /// Findings that fit in no wave (effort above capacity)
    #[serde(default)]
    pub unassigned: Vec<PlanItem>,
}

impl RemediationPlan {
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

// ============================================================================
// CONTROL MAPPINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub control: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub finding_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMappingSet {
    pub framework: String,
    /// Fraction of findings mapped to at least one control (0-1)
    pub coverage: f64,
    pub unique_controls: usize,
    pub mappings: Vec<ControlMapping>,
    #[serde(default)]
    pub unmapped: Vec<String>,
}

// ============================================================================
// IMPACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub wave: String,
    pub cumulative_risk_saved: f64,
    pub percent_of_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub readiness_percent: f64,
    pub compliance_boost: f64,
    pub residual_risk: f64,
    #[serde(default)]
    pub risk_saved_curve: Vec<CurvePoint>,
    #[serde(default)]
    pub controls_covered: usize,
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDocument {
    /// Where the service stored the rendered document
    pub path: String,
    pub html: String,
}

// ============================================================================
// ARTIFACTS
// ============================================================================

/// Output of one stage, tagged by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Findings(Vec<RawFinding>),
    Scores(ScoreSet),
    Waves(RemediationPlan),
    ControlMappings(ControlMappingSet),
    Impact(ImpactEstimate),
    Summary(SummaryDocument),
}

impl StageOutput {
    /// The stage that produces this kind of output.
    pub fn stage(&self) -> StageName {
        match self {
            Self::Findings(_) => StageName::Findings,
            Self::Scores(_) => StageName::Scores,
            Self::Waves(_) => StageName::Waves,
            Self::ControlMappings(_) => StageName::ControlMappings,
            Self::Impact(_) => StageName::Impact,
            Self::Summary(_) => StageName::Summary,
        }
    }

    pub fn as_findings(&self) -> Option<&[RawFinding]> {
        match self {
            Self::Findings(findings) => Some(findings),
            _ => None,
        }
    }

    pub fn as_scores(&self) -> Option<&ScoreSet> {
        match self {
            Self::Scores(scores) => Some(scores),
            _ => None,
        }
    }

    pub fn as_waves(&self) -> Option<&RemediationPlan> {
        match self {
            Self::Waves(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn as_control_mappings(&self) -> Option<&ControlMappingSet> {
        match self {
            Self::ControlMappings(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_impact(&self) -> Option<&ImpactEstimate> {
        match self {
            Self::Impact(impact) => Some(impact),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&SummaryDocument> {
        match self {
            Self::Summary(doc) => Some(doc),
            _ => None,
        }
    }
}

/// A fingerprinted stage output as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageArtifact {
    pub stage: StageName,
    pub output: StageOutput,
    /// SHA-256 of the output's canonical encoding
    pub fingerprint: Fingerprint,
    pub produced_at: DateTime<Utc>,
}

impl StageArtifact {
    pub fn new(output: StageOutput) -> PipelineResult<Self> {
        let fingerprint = Fingerprint::of(&output)?;
        Ok(Self {
            stage: output.stage(),
            output,
            fingerprint,
            produced_at: Utc::now(),
        })
    }
}

/// Result of requesting a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage produced a value.
    Ready(T),
    /// The stage's precondition is not met; nothing was computed.
    NotApplicable { stage: StageName, reason: String },
}

impl<T> StageOutcome<T> {
    pub fn not_applicable(stage: StageName, reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            stage,
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Self::NotApplicable { .. })
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::NotApplicable { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Ready(value) => StageOutcome::Ready(f(value)),
            Self::NotApplicable { stage, reason } => StageOutcome::NotApplicable { stage, reason },
        }
    }
}

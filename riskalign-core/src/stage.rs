//! Stage graph declarations.
//!
//! The graph is static: each stage names its ancestors and the context
//! fields it reads. The executor interprets these declarations; nothing here
//! performs I/O.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    Context, ContextFields, Fingerprint, PipelineError, PipelineResult, RawFinding,
    RemediationPlan, ScoreSet, StageArtifact,
};

// ============================================================================
// STAGE NAMES
// ============================================================================

/// A node in the derivation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageName {
    #[serde(rename = "findings")]
    Findings,
    #[serde(rename = "scores")]
    Scores,
    #[serde(rename = "waves")]
    Waves,
    #[serde(rename = "controls")]
    ControlMappings,
    #[serde(rename = "impact")]
    Impact,
    #[serde(rename = "summary")]
    Summary,
}

impl StageName {
    /// Every stage, ancestors before descendants.
    pub const ALL: [StageName; 6] = [
        StageName::Findings,
        StageName::Scores,
        StageName::Waves,
        StageName::ControlMappings,
        StageName::Impact,
        StageName::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Findings => "findings",
            Self::Scores => "scores",
            Self::Waves => "waves",
            Self::ControlMappings => "controls",
            Self::Impact => "impact",
            Self::Summary => "summary",
        }
    }

    /// Direct ancestors, in the order their fingerprints enter the input key.
    pub fn ancestors(&self) -> &'static [StageName] {
        match self {
            Self::Findings => &[],
            Self::Scores => &[StageName::Findings],
            Self::Waves => &[StageName::Scores],
            Self::ControlMappings => &[StageName::Findings],
            Self::Impact => &[StageName::Scores, StageName::Waves],
            Self::Summary => &[StageName::Findings],
        }
    }

    /// Context fields this stage reads directly.
    pub fn context_dependencies(&self) -> ContextFields {
        let own = match self {
            Self::Findings => ContextFields::ACTIVE_BATCH,
            Self::Scores => ContextFields::empty(),
            Self::Waves => ContextFields::MAX_HOURS_PER_WAVE,
            Self::ControlMappings => ContextFields::FRAMEWORK,
            Self::Impact => ContextFields::empty(),
            Self::Summary => ContextFields::MAX_HOURS_PER_WAVE,
        };
        own | ContextFields::PROVIDER
    }

    /// Direct descendants.
    pub fn children(&self) -> impl Iterator<Item = StageName> + '_ {
        Self::ALL
            .into_iter()
            .filter(move |candidate| candidate.ancestors().contains(self))
    }

    /// All transitive descendants, excluding `self`.
    pub fn descendants(&self) -> BTreeSet<StageName> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![*self];
        while let Some(stage) = frontier.pop() {
            for child in stage.children() {
                if found.insert(child) {
                    frontier.push(child);
                }
            }
        }
        found
    }

    /// `self` plus all transitive ancestors.
    pub fn ancestry(&self) -> BTreeSet<StageName> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![*self];
        while let Some(stage) = frontier.pop() {
            if found.insert(stage) {
                frontier.extend_from_slice(stage.ancestors());
            }
        }
        found
    }

    /// Stages whose cached results are no longer authoritative after
    /// `changed` fields were modified: direct dependents plus everything
    /// downstream of them.
    pub fn affected_by(changed: ContextFields) -> BTreeSet<StageName> {
        let mut affected = BTreeSet::new();
        if changed.is_empty() {
            return affected;
        }
        for stage in Self::ALL {
            if stage.context_dependencies().intersects(changed) {
                affected.insert(stage);
                affected.extend(stage.descendants());
            }
        }
        affected
    }

    /// Reason the stage cannot run yet, if any.
    ///
    /// `inputs` must already hold every ancestor artifact.
    pub fn unmet_precondition(&self, inputs: &StageInputs, context: &Context) -> Option<String> {
        let empty_findings = || inputs.findings().map(|f| f.is_empty()).unwrap_or(true);
        let empty_scores = || inputs.scores().map(|s| s.is_empty()).unwrap_or(true);
        match self {
            Self::Findings if context.active_batch().is_none() => {
                Some("no batch has been ingested".to_string())
            }
            Self::Scores | Self::ControlMappings | Self::Summary if empty_findings() => {
                Some("the active batch has no findings".to_string())
            }
            Self::Waves if empty_scores() => Some("there are no scored findings".to_string()),
            Self::Impact if empty_scores() => Some("there are no scored findings".to_string()),
            Self::Impact if inputs.waves().map(|p| p.is_empty()).unwrap_or(true) => {
                Some("the remediation plan has no waves".to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing StageName from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNameParseError(pub String);

impl fmt::Display for StageNameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage '{}'", self.0)
    }
}

impl std::error::Error for StageNameParseError {}

impl FromStr for StageName {
    type Err = StageNameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "findings" => Ok(Self::Findings),
            "scores" => Ok(Self::Scores),
            "waves" | "plan" => Ok(Self::Waves),
            "controls" | "control_mappings" => Ok(Self::ControlMappings),
            "impact" => Ok(Self::Impact),
            "summary" => Ok(Self::Summary),
            _ => Err(StageNameParseError(s.to_string())),
        }
    }
}

// ============================================================================
// STAGE INPUTS
// ============================================================================

/// Caller-supplied parameters for a stage request.
pub type StageParams = serde_json::Map<String, serde_json::Value>;

/// Everything a stage function receives besides the context.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    pub params: StageParams,
    pub ancestors: BTreeMap<StageName, Arc<StageArtifact>>,
}

impl StageInputs {
    pub fn new(params: StageParams) -> Self {
        Self {
            params,
            ancestors: BTreeMap::new(),
        }
    }

    pub fn with_ancestor(mut self, artifact: Arc<StageArtifact>) -> Self {
        self.ancestors.insert(artifact.stage, artifact);
        self
    }

    pub fn ancestor(&self, stage: StageName) -> Option<&StageArtifact> {
        self.ancestors.get(&stage).map(|a| a.as_ref())
    }

    pub fn findings(&self) -> PipelineResult<&[RawFinding]> {
        self.ancestor(StageName::Findings)
            .and_then(|a| a.output.as_findings())
            .ok_or_else(|| missing(StageName::Findings))
    }

    pub fn scores(&self) -> PipelineResult<&ScoreSet> {
        self.ancestor(StageName::Scores)
            .and_then(|a| a.output.as_scores())
            .ok_or_else(|| missing(StageName::Scores))
    }

    pub fn waves(&self) -> PipelineResult<&RemediationPlan> {
        self.ancestor(StageName::Waves)
            .and_then(|a| a.output.as_waves())
            .ok_or_else(|| missing(StageName::Waves))
    }

    /// Fingerprint of the explicit params followed by the ancestors'
    /// artifact fingerprints in declaration order.
    pub fn fingerprint(&self, stage: StageName) -> PipelineResult<Fingerprint> {
        let mut parts = Vec::with_capacity(stage.ancestors().len() + 1);
        parts.push(Fingerprint::of(&self.params)?);
        for ancestor in stage.ancestors() {
            let artifact = self.ancestor(*ancestor).ok_or_else(|| missing(*ancestor))?;
            parts.push(artifact.fingerprint);
        }
        Ok(Fingerprint::combine(&parts))
    }
}

fn missing(stage: StageName) -> PipelineError {
    PipelineError::internal(format!("{} output missing from stage inputs", stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextPatch, StageOutput};

    #[test]
    fn test_all_is_topological() {
        for (idx, stage) in StageName::ALL.iter().enumerate() {
            for ancestor in stage.ancestors() {
                let pos = StageName::ALL.iter().position(|s| s == ancestor).unwrap();
                assert!(pos < idx, "{} listed after {}", ancestor, stage);
            }
        }
    }

    #[test]
    fn test_every_stage_depends_on_provider() {
        for stage in StageName::ALL {
            assert!(stage.context_dependencies().contains(ContextFields::PROVIDER));
        }
    }

    #[test]
    fn test_descendants() {
        let below_scores = StageName::Scores.descendants();
        assert_eq!(
            below_scores.into_iter().collect::<Vec<_>>(),
            vec![StageName::Waves, StageName::Impact]
        );
        assert_eq!(StageName::Findings.descendants().len(), 5);
        assert!(StageName::Summary.descendants().is_empty());
    }

    #[test]
    fn test_ancestry() {
        let ancestry = StageName::Impact.ancestry();
        assert_eq!(
            ancestry.into_iter().collect::<Vec<_>>(),
            vec![
                StageName::Findings,
                StageName::Scores,
                StageName::Waves,
                StageName::Impact
            ]
        );
    }

    #[test]
    fn test_affected_by_capacity_change() {
        let affected = StageName::affected_by(ContextFields::MAX_HOURS_PER_WAVE);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            vec![StageName::Waves, StageName::Impact, StageName::Summary]
        );
    }

    #[test]
    fn test_affected_by_framework_change() {
        let affected = StageName::affected_by(ContextFields::FRAMEWORK);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            vec![StageName::ControlMappings]
        );
    }

    #[test]
    fn test_provider_and_batch_changes_affect_everything() {
        assert_eq!(StageName::affected_by(ContextFields::PROVIDER).len(), 6);
        assert_eq!(StageName::affected_by(ContextFields::ACTIVE_BATCH).len(), 6);
        assert!(StageName::affected_by(ContextFields::empty()).is_empty());
    }

    #[test]
    fn test_parse_and_display() {
        for stage in StageName::ALL {
            assert_eq!(stage.to_string().parse::<StageName>().unwrap(), stage);
        }
        assert_eq!("plan".parse::<StageName>().unwrap(), StageName::Waves);
        assert!("report".parse::<StageName>().is_err());
    }

    #[test]
    fn test_findings_precondition_needs_batch() {
        let ctx = Context::default();
        let inputs = StageInputs::default();
        assert!(StageName::Findings.unmet_precondition(&inputs, &ctx).is_some());

        let (ctx, _) = ctx.apply(&ContextPatch::new().active_batch(crate::BatchId::new()));
        assert!(StageName::Findings.unmet_precondition(&inputs, &ctx).is_none());
    }

    #[test]
    fn test_scores_precondition_needs_findings() {
        let ctx = Context::default();
        let empty = StageArtifact::new(StageOutput::Findings(Vec::new())).unwrap();
        let inputs = StageInputs::default().with_ancestor(Arc::new(empty));
        assert!(StageName::Scores.unmet_precondition(&inputs, &ctx).is_some());

        let one = StageArtifact::new(StageOutput::Findings(vec![RawFinding::new("F-1", "x")])).unwrap();
        let inputs = StageInputs::default().with_ancestor(Arc::new(one));
        assert!(StageName::Scores.unmet_precondition(&inputs, &ctx).is_none());
    }

    #[test]
    fn test_input_fingerprint_requires_ancestors() {
        let inputs = StageInputs::default();
        assert!(StageName::Findings.ancestors().is_empty());
        assert!(inputs.fingerprint(StageName::Findings).is_ok());
        assert!(inputs.fingerprint(StageName::Scores).is_err());
    }
}

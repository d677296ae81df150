//! Raw findings and ingested batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// RAW FINDINGS
// ============================================================================

/// Asset context attached to a finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetContext {
    /// Asset identifier or hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Business criticality rating such as High, Medium, Low
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<String>,
    /// Exposure level such as Internet or Internal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<String>,
    /// Primary data classification handled by the asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sensitivity: Option<String>,
}

/// An externally supplied finding. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    /// Opaque identifier assigned by the source
    pub id: String,
    /// Short, human-readable title
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    /// Source severity label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// CVSS base score (0-10)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "cvss_score")]
    pub cvss: Option<f64>,
    /// Exploit prediction probability (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epss: Option<f64>,
    /// Listed in the known-exploited catalog
    #[serde(default)]
    pub kev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RawFinding {
    /// Create a finding with only the required fields set.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            cve: None,
            severity: None,
            cvss: None,
            epss: None,
            kev: false,
            asset: None,
            effort_hours: None,
            tags: Vec::new(),
        }
    }

    pub fn with_cvss(mut self, cvss: f64) -> Self {
        self.cvss = Some(cvss);
        self
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve = Some(cve.into());
        self
    }

    pub fn with_effort_hours(mut self, hours: f64) -> Self {
        self.effort_hours = Some(hours);
        self
    }

    pub fn with_kev(mut self, kev: bool) -> Self {
        self.kev = kev;
        self
    }

    /// Whether the record carries the minimum a downstream stage needs.
    pub fn is_valid(&self) -> bool {
        let in_range = |v: Option<f64>, max: f64| v.map_or(true, |v| (0.0..=max).contains(&v));
        !self.id.trim().is_empty()
            && !self.title.trim().is_empty()
            && in_range(self.cvss, 10.0)
            && in_range(self.epss, 1.0)
            && self.effort_hours.map_or(true, |h| h >= 0.0)
    }
}

// ============================================================================
// BATCHES
// ============================================================================

/// Identifier of an ingested batch (UUIDv7, creation-time sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable, identified collection of findings.
///
/// Batches are superseded by later ingestions, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Name of the artifact the batch was built from
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Where the analytics service stored the normalized records
    pub location: String,
    pub findings: Vec<RawFinding>,
}

impl Batch {
    /// Build a new batch. The location defaults to an in-memory URI.
    pub fn new(name: impl Into<String>, location: Option<String>, findings: Vec<RawFinding>) -> Self {
        let id = BatchId::new();
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            location: location.unwrap_or_else(|| format!("memory://batches/{}", id)),
            findings,
        }
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// At most `limit` findings from the head of the batch.
    pub fn preview(&self, limit: usize) -> &[RawFinding] {
        &self.findings[..self.findings.len().min(limit)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_validity() {
        assert!(RawFinding::new("F-1", "OpenSSL heap overflow").with_cvss(9.8).is_valid());
        assert!(!RawFinding::new("", "untitled").is_valid());
        assert!(!RawFinding::new("F-2", "   ").is_valid());
        assert!(!RawFinding::new("F-3", "bad score").with_cvss(11.0).is_valid());
        assert!(!RawFinding::new("F-4", "bad effort").with_effort_hours(-1.0).is_valid());
    }

    #[test]
    fn test_finding_accepts_cvss_score_alias() {
        let json = r#"{"id":"F-9","title":"Weak TLS","cvss_score":5.3,"kev":true}"#;
        let finding: RawFinding = serde_json::from_str(json).unwrap();
        assert_eq!(finding.cvss, Some(5.3));
        assert!(finding.kev);
        assert!(finding.tags.is_empty());
    }

    #[test]
    fn test_batch_default_location_and_preview() {
        let findings = (0..8)
            .map(|i| RawFinding::new(format!("F-{}", i), format!("Finding {}", i)))
            .collect();
        let batch = Batch::new("scan.csv", None, findings);

        assert_eq!(batch.len(), 8);
        assert_eq!(batch.preview(5).len(), 5);
        assert_eq!(batch.preview(50).len(), 8);
        assert_eq!(batch.location, format!("memory://batches/{}", batch.id));
    }

    #[test]
    fn test_batch_ids_are_time_ordered() {
        let first = BatchId::new();
        let second = BatchId::new();
        assert!(second >= first);
    }
}

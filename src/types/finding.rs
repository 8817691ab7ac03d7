//! Structured findings for consistency and integrity problems.
//!
//! ## Purpose
//!
//! Data-quality problems are reported, not thrown. Every problem the atlas
//! detects becomes a `Finding` carrying enough detail (district pair,
//! overlap area and percentage, recomputed roots) to drive remediation in
//! the external quarantine workflow.
//!
//! ## Finding Types
//!
//! | Finding | Severity | Effect |
//! |---------|----------|--------|
//! | ProblematicOverlap | ERROR | Layer excluded from snapshot |
//! | MinorOverlap | WARNING | Reported, layer admitted |
//! | ContainmentViolation | WARNING | Reported, layer admitted |
//! | CoverageGap | INFO | Reported, layer admitted |
//! | DegenerateLayer | INFO | Reported, layer admitted |
//! | LookupCollision | ERROR | Lookup fails |
//! | IntegrityFailure | CRITICAL | Snapshot unusable |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity levels for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Worth reviewing, does not block anything.
    Warning,
    /// Blocks the affected layer or request.
    Error,
    /// Stops all use of the affected snapshot.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingKind {
    /// Two siblings overlap by more than the tolerance.
    ProblematicOverlap {
        /// First district (lexicographically smaller id).
        district_a: String,
        /// Second district.
        district_b: String,
        /// Overlap area in square metres.
        overlap_area_m2: f64,
        /// Overlap as a percentage of the smaller district.
        overlap_percentage: f64,
    },
    /// Two siblings overlap by a non-zero area within tolerance.
    MinorOverlap {
        /// First district.
        district_a: String,
        /// Second district.
        district_b: String,
        /// Overlap area in square metres.
        overlap_area_m2: f64,
        /// Overlap as a percentage of the smaller district.
        overlap_percentage: f64,
    },
    /// A district extends beyond its parent boundary.
    ContainmentViolation {
        /// Offending district.
        district_id: String,
        /// Area outside the parent in square metres.
        outside_area_m2: f64,
    },
    /// The layer does not cover its parent boundary.
    CoverageGap {
        /// Covered fraction of the parent area.
        coverage_ratio: f64,
        /// Parent area not covered by any district, square metres.
        uncovered_area_m2: f64,
    },
    /// The layer has no districts.
    DegenerateLayer {
        /// Explanation.
        note: String,
    },
    /// A point matched more than one district of one layer.
    LookupCollision {
        /// All matching district ids.
        district_ids: Vec<String>,
        /// Queried latitude.
        latitude: f64,
        /// Queried longitude.
        longitude: f64,
    },
    /// A snapshot's recomputed root differs from its recorded root.
    IntegrityFailure {
        /// Generation of the snapshot.
        generation: u64,
        /// Recorded root (hex).
        expected_root: String,
        /// Recomputed root (hex).
        computed_root: String,
    },
}

impl FindingKind {
    /// Severity of this finding kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::ProblematicOverlap { .. } => Severity::Error,
            Self::MinorOverlap { .. } => Severity::Warning,
            Self::ContainmentViolation { .. } => Severity::Warning,
            Self::CoverageGap { .. } => Severity::Info,
            Self::DegenerateLayer { .. } => Severity::Info,
            Self::LookupCollision { .. } => Severity::Error,
            Self::IntegrityFailure { .. } => Severity::Critical,
        }
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProblematicOverlap { .. } => "problematic_overlap",
            Self::MinorOverlap { .. } => "minor_overlap",
            Self::ContainmentViolation { .. } => "containment_violation",
            Self::CoverageGap { .. } => "coverage_gap",
            Self::DegenerateLayer { .. } => "degenerate_layer",
            Self::LookupCollision { .. } => "lookup_collision",
            Self::IntegrityFailure { .. } => "integrity_failure",
        }
    }
}

/// A recorded finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique finding ID.
    pub id: String,
    /// When the finding was recorded.
    pub detected_at: DateTime<Utc>,
    /// Layer the finding concerns, if any.
    pub layer: Option<String>,
    /// What was found.
    pub kind: FindingKind,
    /// Severity level.
    pub severity: Severity,
}

impl Finding {
    /// Create a new finding.
    pub fn new(kind: FindingKind, layer: Option<String>) -> Self {
        let severity = kind.severity();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            detected_at: Utc::now(),
            layer,
            kind,
            severity,
        }
    }

    /// Log this finding as a structured event at a level matching its severity.
    pub fn log(&self) {
        let layer = self.layer.as_deref().unwrap_or("-");
        match self.severity {
            Severity::Info => tracing::info!(
                finding_id = %self.id,
                code = self.kind.code(),
                layer = layer,
                kind = ?self.kind,
                "atlas finding"
            ),
            Severity::Warning => tracing::warn!(
                finding_id = %self.id,
                code = self.kind.code(),
                layer = layer,
                kind = ?self.kind,
                "atlas finding"
            ),
            Severity::Error | Severity::Critical => tracing::error!(
                finding_id = %self.id,
                code = self.kind.code(),
                severity = %self.severity,
                layer = layer,
                kind = ?self.kind,
                "atlas finding"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        let overlap = FindingKind::ProblematicOverlap {
            district_a: "a".to_string(),
            district_b: "b".to_string(),
            overlap_area_m2: 200_000.0,
            overlap_percentage: 12.0,
        };
        assert_eq!(overlap.severity(), Severity::Error);

        let gap = FindingKind::CoverageGap {
            coverage_ratio: 0.9,
            uncovered_area_m2: 10.0,
        };
        assert_eq!(gap.severity(), Severity::Info);
        assert!(Severity::Critical > Severity::Error);
    }

    #[test]
    fn test_finding_serializes_tagged() {
        let finding = Finding::new(
            FindingKind::DegenerateLayer {
                note: "no districts".to_string(),
            },
            Some("us/ca:school".to_string()),
        );
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"]["type"], "degenerate_layer");
        assert_eq!(json["severity"], "INFO");
    }
}

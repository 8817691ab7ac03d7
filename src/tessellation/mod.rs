//! Tessellation validation: do a layer's districts partition their parent?
//!
//! The validator checks three properties of one layer against its parent
//! boundary:
//!
//! 1. **Overlap**: pairwise intersection area between siblings. This alone
//!    decides the verdict.
//! 2. **Containment**: each district must lie inside the parent to within
//!    the same tolerance. Violations are notes, not verdict inputs, because
//!    they indicate wrong source data rather than misdrawn neighbours.
//! 3. **Coverage**: union of districts against the parent area. Purely
//!    informational; sparse layers are handled by the quarantine workflow.
//!
//! ## Verdict
//!
//! Overlap areas are rounded to whole square metres. The verdict is `fail`
//! iff some rounded overlap exceeds the tolerance, `warn` iff some overlap
//! is non-zero but within tolerance, and `pass` otherwise. Non-zero means at
//! least [`MIN_RECORDED_OVERLAP_M2`] (1 m²) after rounding; smaller slivers
//! are neither recorded as pairs nor counted toward `warn`.
//!
//! Data-quality problems never produce an `Err`; only structurally invalid
//! input does (missing parent, empty or non-finite geometry).

pub mod overlap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::config::TessellationConfig;
use crate::geometry::{self, GeometryError};
use crate::types::{Finding, FindingKind, NormalizedDistrict};

pub use overlap::{OverlapAnalyzer, OverlapEntry, OverlapMatrix, OverlapPair, MIN_RECORDED_OVERLAP_M2};

/// Coverage below this ratio is reported as a gap finding.
const COVERAGE_REPORT_THRESHOLD: f64 = 0.999;

/// Tessellation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No overlaps.
    Pass,
    /// Overlaps exist but all are within tolerance.
    Warn,
    /// At least one overlap exceeds tolerance.
    Fail,
}

impl Verdict {
    /// Classify a set of overlap areas against a tolerance.
    ///
    /// Areas rounding below [`MIN_RECORDED_OVERLAP_M2`] count as no overlap.
    pub fn classify<I>(overlap_areas_m2: I, tolerance_m2: f64) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut verdict = Self::Pass;
        for area in overlap_areas_m2 {
            let rounded = area.round();
            if rounded > tolerance_m2 {
                return Self::Fail;
            }
            if rounded >= MIN_RECORDED_OVERLAP_M2 {
                verdict = Self::Warn;
            }
        }
        verdict
    }
}

/// A district reaching outside its parent boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainmentViolation {
    /// Offending district.
    pub district_id: String,
    /// Area outside the parent, square metres.
    pub outside_area_m2: f64,
}

/// Coverage of the parent boundary by the layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoverageStats {
    /// Parent boundary area, square metres.
    pub parent_area_m2: f64,
    /// Area of (union of districts) ∩ parent, square metres.
    pub covered_area_m2: f64,
    /// `covered / parent`, or 0 when the parent has no area.
    pub coverage_ratio: f64,
}

impl CoverageStats {
    /// Parent area not covered by any district.
    pub fn uncovered_area_m2(&self) -> f64 {
        (self.parent_area_m2 - self.covered_area_m2).max(0.0)
    }
}

/// Result of validating one layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TessellationReport {
    /// Number of districts validated.
    pub total_districts: usize,
    /// Overlapping pairs, sorted by ids.
    pub overlapping_pairs: Vec<OverlapPair>,
    /// Symmetric overlap area matrix.
    pub overlap_matrix: OverlapMatrix,
    /// Largest overlap area, square metres.
    pub max_overlap_area_m2: f64,
    /// Whether any overlap exceeds the tolerance.
    pub has_problematic_overlaps: bool,
    /// Overall verdict.
    pub verdict: Verdict,
    /// Settings the layer was validated under.
    pub config: TessellationConfig,
    /// Districts extending beyond the parent by more than the tolerance.
    pub containment_violations: Vec<ContainmentViolation>,
    /// Informational coverage statistics.
    pub coverage: CoverageStats,
    /// Human-readable notes.
    pub notes: Vec<String>,
}

impl TessellationReport {
    fn degenerate(config: TessellationConfig) -> Self {
        Self {
            total_districts: 0,
            overlapping_pairs: Vec::new(),
            overlap_matrix: OverlapMatrix::default(),
            max_overlap_area_m2: 0.0,
            has_problematic_overlaps: false,
            verdict: Verdict::Pass,
            config,
            containment_violations: Vec::new(),
            coverage: CoverageStats::default(),
            notes: vec![
                "layer has no districts; nothing to tessellate, verdict is pass by definition"
                    .to_string(),
            ],
        }
    }

    /// Pairs whose overlap exceeds the tolerance.
    pub fn problematic_pairs(&self) -> Vec<&OverlapPair> {
        self.overlapping_pairs
            .iter()
            .filter(|p| p.rounded_area_m2() > self.config.overlap_tolerance_m2)
            .collect()
    }

    /// Structured findings for everything this report flags.
    pub fn findings(&self, layer: &str) -> Vec<Finding> {
        let layer = Some(layer.to_string());
        let mut findings = Vec::new();

        if self.total_districts == 0 {
            findings.push(Finding::new(
                FindingKind::DegenerateLayer {
                    note: self.notes.first().cloned().unwrap_or_default(),
                },
                layer.clone(),
            ));
            return findings;
        }

        for pair in &self.overlapping_pairs {
            let kind = if pair.rounded_area_m2() > self.config.overlap_tolerance_m2 {
                FindingKind::ProblematicOverlap {
                    district_a: pair.district_a.clone(),
                    district_b: pair.district_b.clone(),
                    overlap_area_m2: pair.overlap_area_m2,
                    overlap_percentage: pair.overlap_percentage,
                }
            } else {
                FindingKind::MinorOverlap {
                    district_a: pair.district_a.clone(),
                    district_b: pair.district_b.clone(),
                    overlap_area_m2: pair.overlap_area_m2,
                    overlap_percentage: pair.overlap_percentage,
                }
            };
            findings.push(Finding::new(kind, layer.clone()));
        }

        for violation in &self.containment_violations {
            findings.push(Finding::new(
                FindingKind::ContainmentViolation {
                    district_id: violation.district_id.clone(),
                    outside_area_m2: violation.outside_area_m2,
                },
                layer.clone(),
            ));
        }

        if self.coverage.coverage_ratio < COVERAGE_REPORT_THRESHOLD {
            findings.push(Finding::new(
                FindingKind::CoverageGap {
                    coverage_ratio: self.coverage.coverage_ratio,
                    uncovered_area_m2: self.coverage.uncovered_area_m2(),
                },
                layer,
            ));
        }

        findings
    }
}

/// Structural input errors. Data-quality issues are never reported this way.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TessellationError {
    /// No parent boundary was supplied.
    #[error("Missing parent boundary")]
    MissingParentBoundary,
    /// The parent boundary is not a valid polygon set.
    #[error("Invalid parent boundary: {0}")]
    InvalidParent(#[source] GeometryError),
    /// A district geometry is not a valid polygon set.
    #[error("Invalid geometry for district {id}: {source}")]
    InvalidGeometry {
        /// Offending district.
        id: String,
        /// Underlying geometry error.
        #[source]
        source: GeometryError,
    },
}

/// Validates that a layer tessellates its parent boundary.
#[derive(Debug, Clone, Default)]
pub struct TessellationValidator {
    config: TessellationConfig,
    parallel: bool,
}

impl TessellationValidator {
    /// Create a validator that spreads pair analysis across the rayon pool.
    pub fn new(config: TessellationConfig) -> Self {
        Self {
            config,
            parallel: true,
        }
    }

    /// Create a single-threaded validator.
    pub fn serial(config: TessellationConfig) -> Self {
        Self {
            config,
            parallel: false,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &TessellationConfig {
        &self.config
    }

    /// Validate a layer against its parent boundary.
    ///
    /// Districts may be supplied in any order; they are analysed sorted by id.
    pub fn validate(
        &self,
        parent: Option<&MultiPolygon<f64>>,
        districts: &[NormalizedDistrict],
    ) -> Result<TessellationReport, TessellationError> {
        let parent = parent.ok_or(TessellationError::MissingParentBoundary)?;
        geometry::validate(parent, self.config.check_simple_rings)
            .map_err(TessellationError::InvalidParent)?;

        for d in districts {
            geometry::validate(&d.geometry, self.config.check_simple_rings).map_err(|source| {
                TessellationError::InvalidGeometry {
                    id: d.id.clone(),
                    source,
                }
            })?;
        }

        let tolerance = self.config.overlap_tolerance_m2;
        if districts.is_empty() {
            return Ok(TessellationReport::degenerate(self.config.clone()));
        }

        let metric = self.config.area_metric;
        let mut sorted: Vec<&NormalizedDistrict> = districts.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let areas: Vec<f64> = sorted.iter().map(|d| metric.area(&d.geometry)).collect();

        let analyzer = if self.parallel {
            OverlapAnalyzer::new(metric)
        } else {
            OverlapAnalyzer::serial(metric)
        };
        let (overlap_matrix, overlapping_pairs) = analyzer.compute(&sorted, &areas);

        let max_overlap_area_m2 = overlapping_pairs
            .iter()
            .map(|p| p.overlap_area_m2)
            .fold(0.0, f64::max);
        let verdict = Verdict::classify(overlapping_pairs.iter().map(|p| p.overlap_area_m2), tolerance);

        let containment_violations: Vec<ContainmentViolation> = sorted
            .iter()
            .filter_map(|d| {
                let outside = geometry::area_outside(&d.geometry, parent, metric);
                (outside.round() > tolerance).then(|| ContainmentViolation {
                    district_id: d.id.clone(),
                    outside_area_m2: outside,
                })
            })
            .collect();

        let parent_area_m2 = metric.area(parent);
        let union = geometry::union_all(sorted.iter().map(|d| &d.geometry));
        let covered_area_m2 = geometry::intersection_area(&union, parent, metric);
        let coverage = CoverageStats {
            parent_area_m2,
            covered_area_m2,
            coverage_ratio: if parent_area_m2 > 0.0 {
                (covered_area_m2 / parent_area_m2).min(1.0)
            } else {
                0.0
            },
        };

        let mut notes = Vec::new();
        if sorted.len() == 1 {
            notes.push("single district (at-large); no sibling pairs to compare".to_string());
        }
        if !containment_violations.is_empty() {
            notes.push(format!(
                "{} district(s) extend beyond the parent boundary",
                containment_violations.len()
            ));
        }
        if coverage.coverage_ratio < COVERAGE_REPORT_THRESHOLD {
            notes.push(format!(
                "districts cover {:.2}% of the parent boundary",
                coverage.coverage_ratio * 100.0
            ));
        }

        Ok(TessellationReport {
            total_districts: sorted.len(),
            has_problematic_overlaps: verdict == Verdict::Fail,
            overlapping_pairs,
            overlap_matrix,
            max_overlap_area_m2,
            verdict,
            config: self.config.clone(),
            containment_violations,
            coverage,
            notes,
        })
    }
}

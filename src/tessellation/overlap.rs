//! Pairwise overlap computation between sibling districts.
//!
//! The pair index space `{(i, j) | i < j}` is split by `i` across rayon
//! workers. Each worker prunes its candidates with an R-tree envelope query,
//! computes exact intersection areas and returns its own slice of entries;
//! the slices are reduced in index order and sorted, so the result does not
//! depend on the worker count.

use rayon::prelude::*;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::geometry::{self, AreaMetric, IndexedEnvelope};
use crate::types::NormalizedDistrict;

/// Overlaps whose rounded area is below this are treated as zero.
pub const MIN_RECORDED_OVERLAP_M2: f64 = 1.0;

/// An overlapping district pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlapPair {
    /// First district id (lexicographically smaller).
    pub district_a: String,
    /// Second district id.
    pub district_b: String,
    /// Intersection area in square metres.
    pub overlap_area_m2: f64,
    /// Intersection as a percentage of the smaller district's area.
    pub overlap_percentage: f64,
}

impl OverlapPair {
    /// Create a new pair with canonical id ordering.
    pub fn new(a: String, b: String, overlap_area_m2: f64, overlap_percentage: f64) -> Self {
        let (district_a, district_b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            district_a,
            district_b,
            overlap_area_m2,
            overlap_percentage,
        }
    }

    /// Overlap area rounded to whole square metres, as used by the verdict.
    pub fn rounded_area_m2(&self) -> f64 {
        self.overlap_area_m2.round()
    }
}

/// One non-zero cell of the overlap matrix (upper triangle only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OverlapEntry {
    /// Row index (always `< j`).
    pub i: usize,
    /// Column index.
    pub j: usize,
    /// Intersection area in square metres.
    pub area_m2: f64,
}

/// Sparse symmetric matrix of overlap areas.
///
/// Indices follow `ids`, which is sorted. Only the upper triangle is stored;
/// `get(i, j)` and `get(j, i)` read the same cell. The diagonal is undefined.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OverlapMatrix {
    /// District ids, sorted; row/column labels.
    pub ids: Vec<String>,
    /// Non-zero upper-triangle entries, sorted by `(i, j)`.
    pub entries: Vec<OverlapEntry>,
}

impl OverlapMatrix {
    /// Matrix dimension.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Overlap area between rows `i` and `j`. `None` on the diagonal or out
    /// of range; `Some(0.0)` for pairs that do not overlap.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i == j || i >= self.ids.len() || j >= self.ids.len() {
            return None;
        }
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let area = self
            .entries
            .binary_search_by(|e| (e.i, e.j).cmp(&(i, j)))
            .map(|pos| self.entries[pos].area_m2)
            .unwrap_or(0.0);
        Some(area)
    }

    /// Overlap area between two districts by id.
    pub fn get_by_id(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.ids.binary_search_by(|id| id.as_str().cmp(a)).ok()?;
        let j = self.ids.binary_search_by(|id| id.as_str().cmp(b)).ok()?;
        self.get(i, j)
    }
}

/// Computes pairwise overlaps over districts sorted by id.
#[derive(Debug, Clone, Copy)]
pub struct OverlapAnalyzer {
    /// Area metric.
    pub metric: AreaMetric,
    /// Spread the pair space across the current rayon pool.
    pub parallel: bool,
}

impl OverlapAnalyzer {
    /// Create a parallel analyzer.
    pub fn new(metric: AreaMetric) -> Self {
        Self {
            metric,
            parallel: true,
        }
    }

    /// Create a single-threaded analyzer.
    pub fn serial(metric: AreaMetric) -> Self {
        Self {
            metric,
            parallel: false,
        }
    }

    /// Compute the overlap matrix and overlapping pairs.
    ///
    /// `districts` must already be sorted by id; `areas[k]` is the area of
    /// `districts[k]`.
    pub fn compute(
        &self,
        districts: &[&NormalizedDistrict],
        areas: &[f64],
    ) -> (OverlapMatrix, Vec<OverlapPair>) {
        let n = districts.len();
        let rtree = RTree::bulk_load(
            districts
                .iter()
                .enumerate()
                .map(|(idx, d)| IndexedEnvelope { idx, bbox: d.bbox })
                .collect(),
        );

        let row = |i: usize| -> Vec<OverlapEntry> {
            let mut out = Vec::new();
            for candidate in rtree.locate_in_envelope_intersecting(&districts[i].bbox.envelope()) {
                let j = candidate.idx;
                if j <= i {
                    continue;
                }
                let area = geometry::intersection_area(
                    &districts[i].geometry,
                    &districts[j].geometry,
                    self.metric,
                );
                if area.round() >= MIN_RECORDED_OVERLAP_M2 {
                    out.push(OverlapEntry { i, j, area_m2: area });
                }
            }
            out
        };

        let mut entries: Vec<OverlapEntry> = if self.parallel {
            (0..n)
                .into_par_iter()
                .map(row)
                .reduce(Vec::new, |mut acc, slice| {
                    acc.extend(slice);
                    acc
                })
        } else {
            (0..n).flat_map(row).collect()
        };
        entries.sort_by(|a, b| (a.i, a.j).cmp(&(b.i, b.j)));

        let pairs = entries
            .iter()
            .map(|e| {
                let smaller = areas[e.i].min(areas[e.j]);
                let percentage = if smaller > 0.0 {
                    e.area_m2 / smaller * 100.0
                } else {
                    0.0
                };
                OverlapPair::new(
                    districts[e.i].id.clone(),
                    districts[e.j].id.clone(),
                    e.area_m2,
                    percentage,
                )
            })
            .collect();

        let matrix = OverlapMatrix {
            ids: districts.iter().map(|d| d.id.clone()).collect(),
            entries,
        };

        (matrix, pairs)
    }
}

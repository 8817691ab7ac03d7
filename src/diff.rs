//! District-level diff between two atlas generations.
//!
//! ## Classification
//!
//! | Outcome | Rule |
//! |---------|------|
//! | added | id only in `current` |
//! | removed | id only in `previous` |
//! | modified | id in both, at least one field differs |
//!
//! For modified districts `changes` lists, in fixed order, `name`,
//! `geometry`, `bbox`, `jurisdiction` and `provenance`. Geometry is compared
//! as the canonical rounded coordinate sequence, so reordering rings or
//! vertices counts as a change. `bbox` accompanies every geometry change; a
//! bbox that differs while the geometry does not is a [`DiffError`].
//!
//! The engine is pure. Swapping the arguments swaps `added` and `removed`
//! and negates every area delta.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{canonical_rings, AreaMetric};
use crate::types::{LayerKey, NormalizedDistrict};

/// A field that differs between two versions of a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    /// Display name.
    Name,
    /// Rounded coordinate sequence.
    Geometry,
    /// Derived bounding box.
    Bbox,
    /// Jurisdiction path.
    Jurisdiction,
    /// Any committed provenance component.
    Provenance,
}

/// A district present in both generations with at least one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedDistrict {
    /// District id.
    pub id: String,
    /// Changed fields, in declaration order.
    pub changes: Vec<ChangedField>,
    /// `area(current) - area(previous)` in square metres, when geometry changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_delta_m2: Option<f64>,
}

impl ModifiedDistrict {
    /// Check whether a field changed.
    pub fn changed(&self, field: ChangedField) -> bool {
        self.changes.contains(&field)
    }
}

/// Diff of one district set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    /// Ids only in the current set, sorted.
    pub added: Vec<String>,
    /// Ids only in the previous set, sorted.
    pub removed: Vec<String>,
    /// Districts in both sets that differ, sorted by id.
    pub modified: Vec<ModifiedDistrict>,
}

impl DiffReport {
    /// Whether anything differs.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Number of affected districts.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Input that the diff refuses to interpret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// The bounding box changed while the geometry did not.
    #[error("District {id}: bbox changed without a geometry change")]
    BboxWithoutGeometry {
        /// District id.
        id: String,
    },
    /// An id appeared twice on one side.
    #[error("Duplicate district id {id} in {side} set")]
    DuplicateId {
        /// District id.
        id: String,
        /// `previous` or `current`.
        side: &'static str,
    },
}

/// Compares district sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    metric: AreaMetric,
}

impl DiffEngine {
    /// Create an engine that measures area deltas with `metric`.
    pub fn new(metric: AreaMetric) -> Self {
        Self { metric }
    }

    /// Diff two district sets.
    pub fn diff_districts(
        &self,
        previous: &[NormalizedDistrict],
        current: &[NormalizedDistrict],
    ) -> Result<DiffReport, DiffError> {
        let prev = index(previous, "previous")?;
        let curr = index(current, "current")?;

        let mut report = DiffReport::default();
        for (id, c) in &curr {
            match prev.get(id) {
                None => report.added.push((*id).to_string()),
                Some(p) => {
                    if let Some(m) = self.compare(p, c)? {
                        report.modified.push(m);
                    }
                }
            }
        }
        report.removed = prev
            .keys()
            .filter(|id| !curr.contains_key(*id))
            .map(|id| (*id).to_string())
            .collect();

        Ok(report)
    }

    fn compare(
        &self,
        previous: &NormalizedDistrict,
        current: &NormalizedDistrict,
    ) -> Result<Option<ModifiedDistrict>, DiffError> {
        let mut changes = Vec::new();

        if previous.name != current.name {
            changes.push(ChangedField::Name);
        }

        let geometry_changed = canonical_rings(&previous.geometry) != canonical_rings(&current.geometry);
        let bbox_changed = previous.bbox.rounded() != current.bbox.rounded();
        if bbox_changed && !geometry_changed {
            return Err(DiffError::BboxWithoutGeometry {
                id: current.id.clone(),
            });
        }
        if geometry_changed {
            changes.push(ChangedField::Geometry);
            changes.push(ChangedField::Bbox);
        }

        if previous.jurisdiction != current.jurisdiction {
            changes.push(ChangedField::Jurisdiction);
        }
        if !previous.provenance.same_commitment(&current.provenance) {
            changes.push(ChangedField::Provenance);
        }

        if changes.is_empty() {
            return Ok(None);
        }

        let area_delta_m2 = geometry_changed
            .then(|| self.metric.area(&current.geometry) - self.metric.area(&previous.geometry));

        Ok(Some(ModifiedDistrict {
            id: current.id.clone(),
            changes,
            area_delta_m2,
        }))
    }
}

fn index<'a>(
    districts: &'a [NormalizedDistrict],
    side: &'static str,
) -> Result<BTreeMap<&'a str, &'a NormalizedDistrict>, DiffError> {
    let mut map = BTreeMap::new();
    for d in districts {
        if map.insert(d.id.as_str(), d).is_some() {
            return Err(DiffError::DuplicateId {
                id: d.id.clone(),
                side,
            });
        }
    }
    Ok(map)
}

/// Diff between two snapshots, per layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Older generation.
    pub from_generation: u64,
    /// Newer generation.
    pub to_generation: u64,
    /// Layers only in the newer snapshot.
    pub added_layers: Vec<LayerKey>,
    /// Layers only in the older snapshot.
    pub removed_layers: Vec<LayerKey>,
    /// District diff of every layer present in either snapshot that changed.
    pub layers: BTreeMap<LayerKey, DiffReport>,
}

impl SnapshotDiff {
    /// Whether the two snapshots commit to different content.
    pub fn has_changes(&self) -> bool {
        !self.added_layers.is_empty()
            || !self.removed_layers.is_empty()
            || self.layers.values().any(|r| !r.is_empty())
    }

    /// Flatten into one report with ids qualified as `layer/id`.
    pub fn merged(&self) -> DiffReport {
        let mut out = DiffReport::default();
        for (key, report) in &self.layers {
            let qualify = |id: &str| format!("{key}/{id}");
            out.added.extend(report.added.iter().map(|id| qualify(id)));
            out.removed.extend(report.removed.iter().map(|id| qualify(id)));
            out.modified.extend(report.modified.iter().map(|m| ModifiedDistrict {
                id: qualify(&m.id),
                ..m.clone()
            }));
        }
        out.added.sort();
        out.removed.sort();
        out.modified.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::test_shapes::rect;
    use crate::tessellation::test_support::planar_district;

    fn engine() -> DiffEngine {
        DiffEngine::new(AreaMetric::Planar)
    }

    #[test]
    fn test_diff_completeness() {
        let d1 = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        let d2 = planar_district("d2", 10.0, 0.0, 20.0, 10.0);
        let d3 = planar_district("d3", 20.0, 0.0, 30.0, 10.0);
        let d4 = planar_district("d4", 30.0, 0.0, 40.0, 10.0);
        let mut d1_renamed = d1.clone();
        d1_renamed.name = "Renamed".to_string();

        let report = engine()
            .diff_districts(&[d1, d2.clone(), d3], &[d1_renamed, d2, d4])
            .unwrap();
        assert_eq!(report.added, vec!["d4"]);
        assert_eq!(report.removed, vec!["d3"]);
        assert_eq!(
            report.modified,
            vec![ModifiedDistrict {
                id: "d1".to_string(),
                changes: vec![ChangedField::Name],
                area_delta_m2: None,
            }]
        );
    }

    #[test]
    fn test_geometry_change_implies_bbox_and_area_delta() {
        let before = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        let mut after = before.clone();
        after.set_geometry(rect(0.0, 0.0, 12.0, 10.0)).unwrap();

        let report = engine().diff_districts(&[before.clone()], &[after.clone()]).unwrap();
        let m = &report.modified[0];
        assert_eq!(m.changes, vec![ChangedField::Geometry, ChangedField::Bbox]);
        assert_eq!(m.area_delta_m2.map(f64::round), Some(20.0));

        let reversed = engine().diff_districts(&[after], &[before]).unwrap();
        assert_eq!(reversed.modified[0].area_delta_m2.map(f64::round), Some(-20.0));
    }

    #[test]
    fn test_vertex_reordering_is_a_change() {
        let before = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        let mut after = before.clone();
        let mut ring = after.geometry.0[0].exterior().0.clone();
        ring.pop();
        ring.rotate_left(1);
        ring.push(ring[0]);
        after
            .set_geometry(geo::MultiPolygon::new(vec![geo::Polygon::new(
                geo::LineString::new(ring),
                vec![],
            )]))
            .unwrap();

        let report = engine().diff_districts(&[before], &[after]).unwrap();
        assert!(report.modified[0].changed(ChangedField::Geometry));
        assert_eq!(report.modified[0].area_delta_m2.map(f64::round), Some(0.0));
    }

    #[test]
    fn test_stale_bbox_is_an_error() {
        let before = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        let mut after = before.clone();
        after.bbox.max_x = 11.0;
        assert_eq!(
            engine().diff_districts(&[before], &[after]),
            Err(DiffError::BboxWithoutGeometry { id: "d1".to_string() })
        );
    }

    #[test]
    fn test_provenance_and_jurisdiction_changes() {
        let before = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        let mut after = before.clone();
        after.provenance.feature_count += 1;
        after.jurisdiction = crate::types::Jurisdiction::parse("us/wa/tacoma").unwrap();

        let report = engine().diff_districts(&[before], &[after]).unwrap();
        assert_eq!(
            report.modified[0].changes,
            vec![ChangedField::Jurisdiction, ChangedField::Provenance]
        );
    }

    #[test]
    fn test_identical_sets_and_duplicates() {
        let d = planar_district("d1", 0.0, 0.0, 10.0, 10.0);
        assert!(engine().diff_districts(&[d.clone()], &[d.clone()]).unwrap().is_empty());
        assert!(matches!(
            engine().diff_districts(&[d.clone(), d.clone()], &[d]),
            Err(DiffError::DuplicateId { side: "previous", .. })
        ));
    }

    #[test]
    fn test_snapshot_diff_merge_qualifies_ids() {
        let key = LayerKey::parse("us/wa/seattle:municipal").unwrap();
        let mut layers = BTreeMap::new();
        layers.insert(
            key.clone(),
            DiffReport {
                added: vec!["7".to_string()],
                ..DiffReport::default()
            },
        );
        let diff = SnapshotDiff {
            from_generation: 1,
            to_generation: 2,
            layers,
            ..SnapshotDiff::default()
        };
        assert!(diff.has_changes());
        assert_eq!(diff.merged().added, vec![format!("{key}/7")]);
    }
}

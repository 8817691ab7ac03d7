//! The normalized district record, the unit of truth for the atlas.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use super::layer::{DistrictType, Jurisdiction, LayerKey};
use super::provenance::Provenance;
use crate::geometry::{BoundingBox, GeometryError};

/// One administrative district after ingestion and field mapping.
///
/// `bbox` is derived from `geometry` and must always be its tight envelope.
/// Records deserialized from untrusted input should be checked with
/// [`NormalizedDistrict::has_consistent_bbox`] before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDistrict {
    /// Identifier unique within its layer and jurisdiction (often a GEOID).
    pub id: String,
    /// Display label.
    pub name: String,
    /// Jurisdiction path.
    pub jurisdiction: Jurisdiction,
    /// Administrative layer.
    pub district_type: DistrictType,
    /// Boundary in WGS84 lon/lat.
    pub geometry: MultiPolygon<f64>,
    /// Cached envelope of `geometry`.
    pub bbox: BoundingBox,
    /// Where the record came from.
    pub provenance: Provenance,
}

impl NormalizedDistrict {
    /// Create a district, deriving its bounding box.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        jurisdiction: Jurisdiction,
        district_type: DistrictType,
        geometry: MultiPolygon<f64>,
        provenance: Provenance,
    ) -> Result<Self, GeometryError> {
        let bbox = BoundingBox::of(&geometry)?;
        Ok(Self {
            id: id.into().trim().to_string(),
            name: name.into(),
            jurisdiction,
            district_type,
            geometry,
            bbox,
            provenance,
        })
    }

    /// Key of the layer this district belongs to.
    pub fn layer_key(&self) -> LayerKey {
        LayerKey::new(self.jurisdiction.clone(), self.district_type)
    }

    /// Replace the geometry and recompute the bounding box.
    pub fn set_geometry(&mut self, geometry: MultiPolygon<f64>) -> Result<(), GeometryError> {
        self.bbox = BoundingBox::of(&geometry)?;
        self.geometry = geometry;
        Ok(())
    }

    /// Check that the cached bbox is the envelope of the geometry, at
    /// canonical precision.
    pub fn has_consistent_bbox(&self) -> bool {
        BoundingBox::of(&self.geometry)
            .map(|b| b.rounded() == self.bbox.rounded())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::test_shapes::rect;
    use crate::types::provenance::{ProvenanceBuilder, RetrievalMethod};

    fn provenance() -> Provenance {
        ProvenanceBuilder::new()
            .source_url("https://gis.example.gov/council")
            .retrieval_method(RetrievalMethod::ArcgisRest)
            .response_body(b"features")
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_derives_bbox() {
        let d = NormalizedDistrict::new(
            " 0601 ",
            "District 1",
            Jurisdiction::parse("us/ca").unwrap(),
            DistrictType::Congressional,
            rect(0.0, 0.0, 2.0, 1.0),
            provenance(),
        )
        .unwrap();

        assert_eq!(d.id, "0601");
        assert_eq!(d.bbox.max_x, 2.0);
        assert!(d.has_consistent_bbox());
        assert_eq!(d.layer_key().to_string(), "us/ca:congressional");
    }

    #[test]
    fn test_stale_bbox_detected() {
        let mut d = NormalizedDistrict::new(
            "1",
            "One",
            Jurisdiction::parse("us/ca").unwrap(),
            DistrictType::County,
            rect(0.0, 0.0, 1.0, 1.0),
            provenance(),
        )
        .unwrap();
        d.geometry = rect(0.0, 0.0, 3.0, 1.0);
        assert!(!d.has_consistent_bbox());

        d.set_geometry(rect(0.0, 0.0, 3.0, 1.0)).unwrap();
        assert!(d.has_consistent_bbox());
    }
}

//! Geometry kernel: bounding boxes, validation, area, intersection,
//! containment and canonical rounding.
//!
//! Pure functions over `geo::MultiPolygon<f64>` with x = longitude and
//! y = latitude. Nothing here performs I/O.

use geo::{
    Area, BooleanOps, BoundingRect, Contains, Coord, GeodesicArea, Intersects, Line, LineString,
    MultiPolygon, Point,
};
use rstar::{RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// Number of decimal places coordinates are rounded to before hashing or
/// comparison. Part of the commitment scheme.
pub const COORDINATE_PRECISION: u32 = 7;

const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Errors for structurally invalid geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    /// The geometry had no polygons.
    #[error("Geometry is empty")]
    Empty,
    /// A coordinate was NaN or infinite.
    #[error("Non-finite coordinate in polygon {polygon}, ring {ring}")]
    NonFiniteCoordinate {
        /// Polygon index within the multipolygon.
        polygon: usize,
        /// Ring index (0 = exterior).
        ring: usize,
    },
    /// A ring had fewer than four coordinates or was not closed.
    #[error("Ring {ring} of polygon {polygon} is degenerate ({coords} coordinates)")]
    DegenerateRing {
        /// Polygon index within the multipolygon.
        polygon: usize,
        /// Ring index (0 = exterior).
        ring: usize,
        /// Number of coordinates in the ring.
        coords: usize,
    },
    /// Two non-adjacent edges of a ring cross.
    #[error("Ring {ring} of polygon {polygon} self-intersects")]
    SelfIntersection {
        /// Polygon index within the multipolygon.
        polygon: usize,
        /// Ring index (0 = exterior).
        ring: usize,
    },
}

/// How polygon areas are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaMetric {
    /// Square metres on the WGS84 ellipsoid; coordinates are lon/lat degrees.
    #[default]
    Geodesic,
    /// Planar area; coordinates are already projected metres.
    Planar,
}

impl AreaMetric {
    /// Unsigned area of a geometry in square metres.
    pub fn area(&self, geometry: &MultiPolygon<f64>) -> f64 {
        match self {
            Self::Geodesic => geometry.geodesic_area_unsigned(),
            Self::Planar => geometry.unsigned_area(),
        }
    }

    /// Parse a metric name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "geodesic" => Some(Self::Geodesic),
            "planar" => Some(Self::Planar),
            _ => None,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum longitude (x).
    pub min_x: f64,
    /// Minimum latitude (y).
    pub min_y: f64,
    /// Maximum longitude (x).
    pub max_x: f64,
    /// Maximum latitude (y).
    pub max_y: f64,
}

impl BoundingBox {
    /// Tight envelope of a geometry.
    pub fn of(geometry: &MultiPolygon<f64>) -> Result<Self, GeometryError> {
        let rect = geometry.bounding_rect().ok_or(GeometryError::Empty)?;
        Ok(Self {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        })
    }

    /// Check whether a point lies inside or on the box.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check whether two boxes intersect (touching counts).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Corners rounded to the canonical precision.
    pub fn rounded(&self) -> [i64; 4] {
        [
            round_coordinate(self.min_x),
            round_coordinate(self.min_y),
            round_coordinate(self.max_x),
            round_coordinate(self.max_y),
        ]
    }

    /// Envelope for R-tree indexing.
    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_x, self.min_y], [self.max_x, self.max_y])
    }
}

/// A bounding box tagged with the index of the geometry it belongs to.
#[derive(Debug, Clone)]
pub struct IndexedEnvelope {
    /// Index of the geometry in its owning collection.
    pub idx: usize,
    /// Envelope of that geometry.
    pub bbox: BoundingBox,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox.envelope()
    }
}

/// Check that a geometry is a usable polygon set.
///
/// Rejects empty geometry, non-finite coordinates and degenerate rings. With
/// `check_simple` each ring is also checked for crossing edges, which is
/// quadratic in the ring length.
pub fn validate(geometry: &MultiPolygon<f64>, check_simple: bool) -> Result<(), GeometryError> {
    if geometry.0.is_empty() {
        return Err(GeometryError::Empty);
    }

    for (p, polygon) in geometry.0.iter().enumerate() {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
        for (r, ring) in rings.enumerate() {
            let coords = &ring.0;
            if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(GeometryError::NonFiniteCoordinate { polygon: p, ring: r });
            }
            if coords.len() < 4 || coords.first() != coords.last() {
                return Err(GeometryError::DegenerateRing {
                    polygon: p,
                    ring: r,
                    coords: coords.len(),
                });
            }
            if check_simple && ring_self_intersects(ring) {
                return Err(GeometryError::SelfIntersection { polygon: p, ring: r });
            }
        }
    }

    Ok(())
}

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring.lines().collect();
    let n = lines.len();
    for i in 0..n {
        for j in (i + 2)..n {
            // First and last edges share the closing vertex.
            if i == 0 && j == n - 1 {
                continue;
            }
            if lines[i].intersects(&lines[j]) {
                return true;
            }
        }
    }
    false
}

/// Intersection of two geometries.
pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.intersection(b)
}

/// Area of the intersection of two geometries.
pub fn intersection_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, metric: AreaMetric) -> f64 {
    let overlap = intersection(a, b);
    if overlap.0.is_empty() {
        0.0
    } else {
        metric.area(&overlap)
    }
}

/// Union of a collection of geometries.
pub fn union_all<'a, I>(geometries: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    geometries
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, g| acc.union(g))
}

/// Area of `inner` lying outside `outer`.
pub fn area_outside(inner: &MultiPolygon<f64>, outer: &MultiPolygon<f64>, metric: AreaMetric) -> f64 {
    let total = metric.area(inner);
    let inside = intersection_area(inner, outer, metric);
    (total - inside).max(0.0)
}

/// Strict point-in-polygon test. Points on a boundary are not contained.
pub fn contains_point(geometry: &MultiPolygon<f64>, longitude: f64, latitude: f64) -> bool {
    geometry.contains(&Point::new(longitude, latitude))
}

/// Round one coordinate to the canonical fixed-point grid.
pub fn round_coordinate(value: f64) -> i64 {
    (value * COORDINATE_SCALE).round() as i64
}

/// Canonical coordinate rings: polygons in order, exterior ring first, each
/// coordinate rounded to the canonical precision.
///
/// Ring order and vertex order are preserved as supplied; reordering is a
/// change worth surfacing, not something to normalize away.
pub fn canonical_rings(geometry: &MultiPolygon<f64>) -> Vec<Vec<Vec<(i64, i64)>>> {
    geometry
        .0
        .iter()
        .map(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors().iter())
                .map(|ring| ring.0.iter().map(round_coord).collect())
                .collect()
        })
        .collect()
}

fn round_coord(c: &Coord<f64>) -> (i64, i64) {
    (round_coordinate(c.x), round_coordinate(c.y))
}


#[cfg(test)]
mod tests {
    use super::test_shapes::rect;
    use super::*;
    use geo::{coord, LineString, Polygon};

    #[test]
    fn test_bbox_is_tight() {
        let g = rect(1.0, 2.0, 3.0, 5.0);
        let bbox = BoundingBox::of(&g).unwrap();
        assert_eq!(bbox.min_x, 1.0);
        assert_eq!(bbox.max_y, 5.0);
        assert!(bbox.contains_point(2.0, 3.0));
        assert!(!bbox.contains_point(0.5, 3.0));
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let empty = MultiPolygon::<f64>::new(vec![]);
        assert_eq!(validate(&empty, true), Err(GeometryError::Empty));
        assert_eq!(BoundingBox::of(&empty), Err(GeometryError::Empty));
    }

    #[test]
    fn test_nan_rejected() {
        let ring = LineString::from(vec![(0.0, 0.0), (f64::NAN, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        let g = MultiPolygon::new(vec![Polygon::new(ring, vec![])]);
        assert!(matches!(
            validate(&g, false),
            Err(GeometryError::NonFiniteCoordinate { .. })
        ));
    }

    #[test]
    fn test_bowtie_rejected() {
        let ring = LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        let g = MultiPolygon::new(vec![Polygon::new(ring, vec![])]);
        assert!(matches!(
            validate(&g, true),
            Err(GeometryError::SelfIntersection { .. })
        ));
        assert!(validate(&g, false).is_ok());
        assert!(validate(&rect(0.0, 0.0, 1.0, 1.0), true).is_ok());
    }

    #[test]
    fn test_planar_intersection_area() {
        let a = rect(0.0, 0.0, 1000.0, 1000.0);
        let b = rect(850.0, 0.0, 1850.0, 1000.0);
        let area = intersection_area(&a, &b, AreaMetric::Planar);
        assert_eq!(area.round(), 150_000.0);

        let c = rect(1000.0, 0.0, 2000.0, 1000.0);
        assert_eq!(intersection_area(&a, &c, AreaMetric::Planar).round(), 0.0);
    }

    #[test]
    fn test_area_outside() {
        let parent = rect(0.0, 0.0, 10.0, 10.0);
        let inside = rect(1.0, 1.0, 2.0, 2.0);
        let straddling = rect(9.0, 0.0, 11.0, 10.0);
        assert_eq!(area_outside(&inside, &parent, AreaMetric::Planar).round(), 0.0);
        assert_eq!(area_outside(&straddling, &parent, AreaMetric::Planar).round(), 10.0);
    }

    #[test]
    fn test_union_all() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(1.0, 0.0, 2.0, 1.0);
        let u = union_all([&a, &b]);
        assert!((AreaMetric::Planar.area(&u) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_contains_point_is_strict() {
        let g = rect(0.0, 0.0, 1.0, 1.0);
        assert!(contains_point(&g, 0.5, 0.5));
        assert!(!contains_point(&g, 1.0, 0.5));
        assert!(!contains_point(&g, 2.0, 0.5));
    }

    #[test]
    fn test_canonical_rings_absorb_jitter() {
        let a = rect(-118.25, 34.05, -118.24, 34.06);
        let b = rect(-118.25 + 1e-10, 34.05, -118.24, 34.06 - 1e-10);
        assert_eq!(canonical_rings(&a), canonical_rings(&b));

        let c = rect(-118.25 + 1e-6, 34.05, -118.24, 34.06);
        assert_ne!(canonical_rings(&a), canonical_rings(&c));
        assert_eq!(round_coordinate(coord! { x: 1.0, y: 0.0 }.x), 10_000_000);
    }

    #[test]
    fn test_geodesic_area_is_positive() {
        let g = rect(-118.30, 34.00, -118.20, 34.10);
        let area = AreaMetric::Geodesic.area(&g);
        // Roughly 9.2 km x 11.1 km.
        assert!(area > 90_000_000.0 && area < 115_000_000.0);
    }
}

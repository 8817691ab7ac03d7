//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use chrono::TimeZone;
use geo::{coord, MultiPolygon, Rect};

use district_atlas::{
    DistrictType, Jurisdiction, LayerInput, LayerKey, NormalizedDistrict, Provenance,
    ProvenanceBuilder, RetrievalMethod,
};

/// Width of one ward in degrees (about 750 m at Seattle's latitude).
pub const CELL: f64 = 0.01;
pub const LON0: f64 = -122.40;
pub const LAT0: f64 = 47.60;

pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()])
}

pub fn provenance(body: &[u8]) -> Provenance {
    ProvenanceBuilder::new()
        .source_url("https://data-seattlecitygis.opendata.arcgis.com/wards")
        .retrieval_method(RetrievalMethod::ArcgisRest)
        .retrieved_at(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        .feature_count(7)
        .response_body(body)
        .build()
        .unwrap()
}

pub fn district(
    jurisdiction: &str,
    district_type: DistrictType,
    id: &str,
    geometry: MultiPolygon<f64>,
) -> NormalizedDistrict {
    NormalizedDistrict::new(
        id,
        format!("District {id}"),
        Jurisdiction::parse(jurisdiction).unwrap(),
        district_type,
        geometry,
        provenance(b"v1"),
    )
    .unwrap()
}

pub fn seattle_key() -> LayerKey {
    LayerKey::parse("us/wa/seattle:municipal").unwrap()
}

pub fn king_key() -> LayerKey {
    LayerKey::parse("us/wa/king:county").unwrap()
}

/// West edge of ward `i`.
pub fn ward_lon(i: usize) -> f64 {
    LON0 + CELL * i as f64
}

/// `n` wards side by side, each one cell wide and tall.
pub fn wards(n: usize) -> Vec<NormalizedDistrict> {
    (0..n)
        .map(|i| {
            district(
                "us/wa/seattle",
                DistrictType::Municipal,
                &format!("ward-{i}"),
                rect(ward_lon(i), LAT0, ward_lon(i + 1), LAT0 + CELL),
            )
        })
        .collect()
}

pub fn city_layer(wards: Vec<NormalizedDistrict>, n: usize) -> LayerInput {
    LayerInput::new(seattle_key(), rect(LON0, LAT0, ward_lon(n), LAT0 + CELL), wards)
}

/// One county covering the whole city strip.
pub fn county_layer(n: usize) -> LayerInput {
    let boundary = rect(LON0, LAT0, ward_lon(n), LAT0 + CELL);
    let county = district("us/wa/king", DistrictType::County, "53033", boundary.clone());
    LayerInput::new(king_key(), boundary, vec![county])
}

/// Center of ward `i`, as (latitude, longitude).
pub fn ward_center(i: usize) -> (f64, f64) {
    (LAT0 + CELL / 2.0, ward_lon(i) + CELL / 2.0)
}

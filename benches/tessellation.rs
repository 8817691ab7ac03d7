//! Performance benchmarks for tessellation validation and tree building.
//!
//! Run with: `cargo bench --bench tessellation`
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | Validation | Pairwise overlap map-reduce, serial vs rayon |
//! | Layer tree | Canonicalization plus Poseidon tree over all leaves |
//! | Lookup | R-tree pruning plus point-in-polygon, proof from cache |

use std::sync::Arc;

use chrono::TimeZone;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{coord, MultiPolygon, Rect};

use district_atlas::{
    AtlasBuilder, AtlasConfig, AtlasService, CancelToken, DistrictType, InMemorySnapshotStore,
    Jurisdiction, LayerInput, LayerKey, NormalizedDistrict, ProvenanceBuilder, RetrievalMethod,
    TessellationConfig, TessellationValidator,
};

const CELL: f64 = 0.01;

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()])
}

/// `side * side` precincts tiling a square near Seattle.
fn grid(side: usize) -> (MultiPolygon<f64>, Vec<NormalizedDistrict>) {
    let (lon0, lat0) = (-122.4, 47.5);
    let provenance = ProvenanceBuilder::new()
        .source_url("https://gis.example.gov/precincts")
        .retrieval_method(RetrievalMethod::GeojsonDownload)
        .retrieved_at(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        .response_body(b"precincts")
        .build()
        .unwrap();
    let jurisdiction = Jurisdiction::parse("us/wa/seattle").unwrap();

    let mut districts = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            let x = lon0 + CELL * col as f64;
            let y = lat0 + CELL * row as f64;
            districts.push(
                NormalizedDistrict::new(
                    format!("p-{row:03}-{col:03}"),
                    format!("Precinct {row}/{col}"),
                    jurisdiction.clone(),
                    DistrictType::Special,
                    rect(x, y, x + CELL, y + CELL),
                    provenance.clone(),
                )
                .unwrap(),
            );
        }
    }
    let extent = CELL * side as f64;
    (rect(lon0, lat0, lon0 + extent, lat0 + extent), districts)
}

fn layer(side: usize) -> LayerInput {
    let (parent, districts) = grid(side);
    LayerInput::new(LayerKey::parse("us/wa/seattle:special").unwrap(), parent, districts)
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("tessellation_validate");
    for side in [4usize, 8, 16] {
        let (parent, districts) = grid(side);
        group.throughput(Throughput::Elements(districts.len() as u64));

        let serial = TessellationValidator::serial(TessellationConfig::default());
        group.bench_with_input(BenchmarkId::new("serial", side * side), &districts, |b, d| {
            b.iter(|| serial.validate(Some(black_box(&parent)), black_box(d)).unwrap())
        });

        let parallel = TessellationValidator::new(TessellationConfig::default());
        group.bench_with_input(BenchmarkId::new("parallel", side * side), &districts, |b, d| {
            b.iter(|| parallel.validate(Some(black_box(&parent)), black_box(d)).unwrap())
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("atlas_build");
    group.sample_size(10);
    let builder = AtlasBuilder::new(&AtlasConfig::default()).unwrap();

    for side in [8usize, 16] {
        let input = layer(side);
        group.throughput(Throughput::Elements((side * side) as u64));
        group.bench_with_input(BenchmarkId::new("full", side * side), &input, |b, input| {
            b.iter(|| {
                builder
                    .build(vec![input.clone()], None, 1, &CancelToken::new())
                    .unwrap()
            })
        });

        let previous = builder
            .build(vec![input.clone()], None, 1, &CancelToken::new())
            .unwrap()
            .snapshot
            .unwrap();
        group.bench_with_input(BenchmarkId::new("unchanged", side * side), &input, |b, input| {
            b.iter(|| {
                builder
                    .build(vec![input.clone()], Some(&previous), 2, &CancelToken::new())
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let service =
        AtlasService::open(AtlasConfig::default(), Arc::new(InMemorySnapshotStore::new())).unwrap();
    service.build_atlas(vec![layer(16)]).unwrap();

    c.bench_function("lookup_with_proof", |b| {
        b.iter(|| {
            service
                .lookup(black_box(47.555), black_box(-122.345), None)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_validation, bench_build, bench_lookup);
criterion_main!(benches);

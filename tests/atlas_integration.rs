//! Integration tests for the atlas service.
//!
//! These tests run the full pipeline on geodesic lon/lat inputs:
//! 1. Tessellation validation and partial builds
//! 2. Lookup with inclusion proofs
//! 3. Incremental rebuilds
//! 4. Persistence and integrity on reload
//! 5. Commit races and cancellation
//! 6. Diffs between generations

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use district_atlas::{
    verify_claim, AtlasBuilder, AtlasConfig, AtlasError, AtlasService, BuildStatus, CancelToken,
    ChangedField, DistrictType, FileSnapshotStore, InMemorySnapshotStore, LayerBuildError, LayerInput,
    LayerKey, LookupResult, SnapshotStore, Verdict,
};

use common::*;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn memory_service() -> AtlasService<InMemorySnapshotStore> {
    AtlasService::open(AtlasConfig::default(), Arc::new(InMemorySnapshotStore::new())).unwrap()
}

fn full_batch(n: usize) -> Vec<LayerInput> {
    vec![city_layer(wards(n), n), county_layer(n)]
}

fn overlapping_school_layer() -> LayerInput {
    let key = LayerKey::parse("us/wa/seattle:school").unwrap();
    let a = district(
        "us/wa/seattle",
        DistrictType::School,
        "north",
        rect(ward_lon(0), LAT0, ward_lon(2), LAT0 + CELL),
    );
    // Half a cell of overlap with "north": roughly 400,000 m².
    let b = district(
        "us/wa/seattle",
        DistrictType::School,
        "south",
        rect(ward_lon(1) + CELL / 2.0, LAT0, ward_lon(3), LAT0 + CELL),
    );
    LayerInput::new(key, rect(LON0, LAT0, ward_lon(3), LAT0 + CELL), vec![a, b])
}

// ─────────────────────────────────────────────────────────────────────────────
// Build and lookup
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_build_lookup_and_verify_claims() {
    let svc = memory_service();
    let outcome = svc.build_atlas(full_batch(4)).unwrap();
    assert_eq!(outcome.status, BuildStatus::Succeeded);
    assert_eq!(outcome.reports[&seattle_key()].verdict, Verdict::Pass);

    let snapshot = svc.current().unwrap();
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.total_districts, 5);
    snapshot.verify_integrity().unwrap();

    let (lat, lon) = ward_center(2);
    let result = svc.lookup(lat, lon, None).unwrap();
    let claims = result.claims();
    assert_eq!(claims.len(), 2);
    // Layer key order: us/wa/king sorts before us/wa/seattle.
    assert_eq!(claims[0].layer_key, king_key());
    assert_eq!(claims[1].layer_key, seattle_key());
    assert_eq!(claims[1].district_id, "ward-2");

    for claim in claims {
        assert_eq!(claim.root, snapshot.root);
        let layer = snapshot.layer(&claim.layer_key).unwrap();
        let district = layer.district(&claim.district_id).unwrap();
        assert!(verify_claim(district, &claim.proof, &snapshot.root).unwrap());
    }

    // The proof survives a JSON round trip.
    let json = serde_json::to_string(&claims[1].proof).unwrap();
    let proof: district_atlas::InclusionProof = serde_json::from_str(&json).unwrap();
    assert!(proof.verify(&snapshot.root));
}

#[test]
fn test_lookup_outside_and_on_boundaries() {
    let svc = memory_service();
    svc.build_atlas(full_batch(4)).unwrap();

    // East of the city strip: no layer contains it.
    let (lat, _) = ward_center(0);
    assert_eq!(svc.lookup(lat, ward_lon(6), None).unwrap(), LookupResult::NotFound);

    // On the edge shared by ward-0 and ward-1: no ward claims it, the county does.
    let result = svc.lookup(lat, ward_lon(1), None).unwrap();
    let claims = result.claims();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].layer_key, king_key());

    // Filtered to the city layer only.
    let city = [seattle_key()];
    assert_eq!(svc.lookup(lat, ward_lon(1), Some(&city)).unwrap(), LookupResult::NotFound);
}

#[test]
fn test_overlapping_layer_is_excluded() {
    let svc = memory_service();
    let mut batch = full_batch(3);
    batch.push(overlapping_school_layer());

    let outcome = svc.build_atlas(batch).unwrap();
    assert_eq!(outcome.status, BuildStatus::PartiallySucceeded);

    let school = LayerKey::parse("us/wa/seattle:school").unwrap();
    match &outcome.layer_errors[&school] {
        LayerBuildError::TessellationFailed { pairs, max_overlap_area_m2 } => {
            assert_eq!(pairs, &vec![("north".to_string(), "south".to_string())]);
            assert!(*max_overlap_area_m2 > 150_000.0);
        }
        other => panic!("expected tessellation failure, got {other:?}"),
    }
    assert_eq!(outcome.reports[&school].verdict, Verdict::Fail);

    let snapshot = outcome.snapshot.unwrap();
    assert!(snapshot.layer(&school).is_none());
    assert_eq!(snapshot.layers.len(), 2);
    assert!(outcome
        .findings
        .iter()
        .any(|f| f.layer.as_deref() == Some("us/wa/seattle:school")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Incremental builds and diffs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_incremental_build_matches_full_rebuild() {
    let svc = memory_service();
    svc.build_atlas(full_batch(4)).unwrap();

    let mut changed = wards(4);
    changed[3] = district(
        "us/wa/seattle",
        DistrictType::Municipal,
        "ward-3",
        rect(ward_lon(3), LAT0, ward_lon(4), LAT0 + CELL * 0.9),
    );
    let batch = vec![city_layer(changed, 4), county_layer(4)];

    let outcome = svc.build_atlas(batch.clone()).unwrap();
    assert_eq!(outcome.reused_layers, vec![king_key()]);
    assert_eq!(outcome.rebuilt_layers, vec![seattle_key()]);

    let builder = AtlasBuilder::new(&AtlasConfig::default()).unwrap();
    let fresh = builder.build(batch, None, 99, &CancelToken::new()).unwrap();
    assert_eq!(
        fresh.snapshot.unwrap().root,
        svc.current().unwrap().root,
        "incremental and full builds must agree"
    );
}

#[test]
fn test_diff_between_generations() {
    let svc = memory_service();
    svc.build_atlas(vec![city_layer(wards(3), 3)]).unwrap();

    // ward-1 shrinks, ward-2 is replaced by ward-9, county appears.
    let mut next = wards(3);
    next[1] = district(
        "us/wa/seattle",
        DistrictType::Municipal,
        "ward-1",
        rect(ward_lon(1), LAT0, ward_lon(2), LAT0 + CELL / 2.0),
    );
    next[2] = district(
        "us/wa/seattle",
        DistrictType::Municipal,
        "ward-9",
        rect(ward_lon(2), LAT0, ward_lon(3), LAT0 + CELL),
    );
    svc.build_atlas(vec![city_layer(next, 3), county_layer(3)]).unwrap();

    let diff = svc.diff(1, 2).unwrap();
    assert_eq!(diff.added_layers, vec![king_key()]);
    assert!(diff.removed_layers.is_empty());

    let city = &diff.layers[&seattle_key()];
    assert_eq!(city.added, vec!["ward-9"]);
    assert_eq!(city.removed, vec!["ward-2"]);
    assert_eq!(city.modified.len(), 1);
    let modified = &city.modified[0];
    assert_eq!(modified.id, "ward-1");
    assert!(modified.changed(ChangedField::Geometry));
    assert!(modified.changed(ChangedField::Bbox));
    assert!(modified.area_delta_m2.unwrap() < 0.0);

    assert_eq!(diff.layers[&king_key()].added, vec!["53033"]);

    // Reverse direction mirrors it.
    let back = svc.diff(2, 1).unwrap();
    assert_eq!(back.removed_layers, vec![king_key()]);
    assert_eq!(back.layers[&seattle_key()].added, vec!["ward-2"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = {
        let store = Arc::new(FileSnapshotStore::open(dir.path()).unwrap());
        let svc = AtlasService::open(AtlasConfig::default(), store).unwrap();
        svc.build_atlas(full_batch(2)).unwrap();
        svc.build_atlas(full_batch(3)).unwrap();
        svc.current().unwrap().root
    };

    let store = Arc::new(FileSnapshotStore::open(dir.path()).unwrap());
    let svc = AtlasService::open(AtlasConfig::default(), store).unwrap();
    assert_eq!(svc.current_generation(), 2);
    assert_eq!(svc.current().unwrap().root, root);
    assert_eq!(svc.store().generations().unwrap(), vec![1, 2]);

    let (lat, lon) = ward_center(2);
    let result = svc.lookup(lat, lon, Some(&[seattle_key()])).unwrap();
    assert_eq!(result.claims()[0].district_id, "ward-2");
    assert!(result.claims()[0].proof.verify(&root));

    // The next build continues the generation sequence.
    svc.build_atlas(full_batch(4)).unwrap();
    assert_eq!(svc.current_generation(), 3);
}

#[test]
fn test_tampered_snapshot_is_refused_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::open(dir.path()).unwrap());
    let svc = AtlasService::open(AtlasConfig::default(), Arc::clone(&store)).unwrap();
    svc.build_atlas(full_batch(2)).unwrap();

    // Rename ward-0 without touching any recorded root.
    let path = store.path_for(1);
    let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let id = &mut json["layers"]["us/wa/seattle:municipal"]["districts"][0]["id"];
    assert_eq!(*id, "ward-0");
    *id = "ward-x".into();
    fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let reopened = Arc::new(FileSnapshotStore::open(dir.path()).unwrap());
    let err = AtlasService::open(AtlasConfig::default(), reopened).unwrap_err();
    assert!(matches!(err, AtlasError::Store(_)), "unexpected error: {err}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_racing_builds_commit_consecutive_generations() {
    let svc = memory_service();
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| svc.build_atlas(full_batch(2))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut committed = 0u64;
    for result in results {
        match result {
            Ok(outcome) => {
                assert!(outcome.snapshot.is_some());
                committed += 1;
            }
            Err(AtlasError::ConcurrentCommit { expected, found }) => assert!(found > expected),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert!(committed >= 1);
    assert_eq!(svc.current_generation(), committed);
    let expected: Vec<u64> = (1..=committed).collect();
    assert_eq!(svc.store().generations().unwrap(), expected);
}

#[test]
fn test_cancelled_build_commits_nothing() {
    let svc = memory_service();
    svc.build_atlas(full_batch(2)).unwrap();
    let before = svc.current().unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = svc.build_atlas_with_cancel(full_batch(3), &token).unwrap_err();
    assert!(matches!(err, AtlasError::Cancelled));

    assert!(Arc::ptr_eq(&svc.current().unwrap(), &before));
    assert_eq!(svc.store().generations().unwrap(), vec![1]);
}

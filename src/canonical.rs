//! Canonical serialization and fast fingerprints for non-circuit artifacts.
//!
//! Poseidon commits everything a verifier checks. Bookkeeping that never
//! leaves this process (manifest digests, parent boundary fingerprints used
//! for layer reuse) uses xxh64 over canonical JSON instead.
//!
//! ## Determinism
//!
//! - Struct fields serialize in declaration order
//! - Maps must be `BTreeMap`; `HashMap` is never hashed
//! - Geometry is fingerprinted after canonical rounding, never as raw floats

use geo::MultiPolygon;
use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::geometry::canonical_rings;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// xxh64 of the canonical bytes of a value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&to_canonical_bytes(value)?, 0))
}

/// [`canonical_hash`] as 16 hex characters.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", canonical_hash(value)?))
}

/// Fingerprint of a boundary at canonical precision.
pub fn boundary_fingerprint(geometry: &MultiPolygon<f64>) -> String {
    let rings = canonical_rings(geometry);
    let mut bytes = Vec::with_capacity(16 * rings.iter().flatten().map(Vec::len).sum::<usize>());
    bytes.extend_from_slice(&(rings.len() as u64).to_be_bytes());
    for polygon in &rings {
        bytes.extend_from_slice(&(polygon.len() as u64).to_be_bytes());
        for ring in polygon {
            bytes.extend_from_slice(&(ring.len() as u64).to_be_bytes());
            for (x, y) in ring {
                bytes.extend_from_slice(&x.to_be_bytes());
                bytes.extend_from_slice(&y.to_be_bytes());
            }
        }
    }
    format!("{:016x}", xxh64(&bytes, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::test_shapes::rect;
    use std::collections::BTreeMap;

    #[test]
    fn test_canonical_hash_is_stable() {
        let mut a = BTreeMap::new();
        a.insert("b", 2);
        a.insert("a", 1);
        let mut b = BTreeMap::new();
        b.insert("a", 1);
        b.insert("b", 2);
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
        assert_eq!(canonical_hash_hex(&a).unwrap().len(), 16);
    }

    #[test]
    fn test_boundary_fingerprint_ignores_jitter() {
        let a = rect(-122.4, 47.5, -122.2, 47.7);
        let b = rect(-122.4 + 1e-11, 47.5, -122.2, 47.7);
        let c = rect(-122.4, 47.5, -122.2, 47.8);
        assert_eq!(boundary_fingerprint(&a), boundary_fingerprint(&b));
        assert_ne!(boundary_fingerprint(&a), boundary_fingerprint(&c));
    }
}

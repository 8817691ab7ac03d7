//! Canonicalizer: `NormalizedDistrict → MerkleLeaf`.
//!
//! The pre-hash encoding is a fixed schema, independent of how the record
//! was built or serialized:
//!
//! ```text
//! geometry   = fold over polygons, rings and rounded coordinates
//! identity   = P4(id, jurisdiction, type code, geometry)
//! fetch      = P5(source url, method, retrieved-at secs, http status, feature count)
//! provenance = P3(fetch, coordinate system, response hash)
//! leaf       = P3(LEAF_TAG, identity, provenance)
//! ```
//!
//! Identity and provenance are separate digests so a proof can open one
//! without the other. The display name is not committed; renames surface in
//! the diff but do not change the leaf.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

use crate::geometry::canonical_rings;
use crate::hash::{fe_i64, fe_u64, FieldHasher, HashError, NodeHash};
use crate::types::{NormalizedDistrict, Provenance};

/// Leading tag of every leaf hash.
pub const LEAF_TAG: u64 = 1;

/// Canonical leaf of one district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleLeaf {
    /// District id.
    pub district_id: String,
    /// `P4(id, jurisdiction, type, geometry_digest)`.
    pub identity_digest: NodeHash,
    /// Digest of the rounded coordinate sequence.
    pub geometry_digest: NodeHash,
    /// Digest of the provenance record.
    pub provenance_digest: NodeHash,
    /// Leaf hash.
    pub hash: NodeHash,
}

/// Deterministic district encoder.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    hasher: FieldHasher,
}

impl Canonicalizer {
    /// Create a canonicalizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a district as a leaf.
    pub fn leaf(&mut self, district: &NormalizedDistrict) -> Result<MerkleLeaf, HashError> {
        let geometry = self.geometry_digest(district)?;
        let id = self.hasher.string(&district.id)?;
        let jurisdiction = self.hasher.string(&district.jurisdiction.as_path())?;
        let identity = self.hasher.hash(&[
            id,
            jurisdiction,
            fe_u64(district.district_type.code()),
            geometry,
        ])?;
        let provenance = self.provenance_digest(&district.provenance)?;
        let hash = self.hasher.hash(&[fe_u64(LEAF_TAG), identity, provenance])?;

        Ok(MerkleLeaf {
            district_id: district.id.clone(),
            identity_digest: NodeHash::from_field(identity),
            geometry_digest: NodeHash::from_field(geometry),
            provenance_digest: NodeHash::from_field(provenance),
            hash: NodeHash::from_field(hash),
        })
    }

    fn geometry_digest(&mut self, district: &NormalizedDistrict) -> Result<Fr, HashError> {
        let polygons = canonical_rings(&district.geometry);
        let mut acc = fe_u64(polygons.len() as u64);
        for rings in &polygons {
            acc = self.hasher.hash2(acc, fe_u64(rings.len() as u64))?;
            for ring in rings {
                acc = self.hasher.hash2(acc, fe_u64(ring.len() as u64))?;
                for &(x, y) in ring {
                    acc = self.hasher.hash(&[acc, fe_i64(x), fe_i64(y)])?;
                }
            }
        }
        Ok(acc)
    }

    /// Digest of a provenance record alone.
    pub fn provenance_digest(&mut self, provenance: &Provenance) -> Result<Fr, HashError> {
        let url = self.hasher.string(&provenance.source_url)?;
        let method = self.hasher.string(provenance.retrieval_method.as_str())?;
        let fetch = self.hasher.hash(&[
            url,
            method,
            fe_i64(provenance.retrieved_at_secs()),
            fe_u64(u64::from(provenance.http_status)),
            fe_u64(u64::from(provenance.feature_count)),
        ])?;
        let crs = self.hasher.string(&provenance.coordinate_system)?;
        let response = self
            .hasher
            .string(&provenance.response_hash.to_ascii_lowercase())?;
        self.hasher.hash(&[fetch, crs, response])
    }
}

/// Canonicalize one district with a fresh hasher.
pub fn canonicalize(district: &NormalizedDistrict) -> Result<MerkleLeaf, HashError> {
    Canonicalizer::new().leaf(district)
}

//! Immutable atlas snapshots.
//!
//! An `AtlasSnapshot` is one generation of the atlas: every admitted layer
//! with its districts, leaves and tree, the combination of all layer roots,
//! and the top-level root. Snapshots are never mutated; the next build
//! produces a new one and layers that did not change are shared by `Arc`.
//!
//! ## Persistence format
//!
//! The full snapshot serializes as JSON with layers in key order. Its
//! [`SnapshotManifest`] is the portable subset (scheme version, generation,
//! creation time, ordered `(layer key, root, leaf count)`, root, district
//! count) from which an independent verifier can recompute the root.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use rayon::prelude::*;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use crate::canonical::{boundary_fingerprint, canonical_hash_hex, to_canonical_bytes};
use crate::geometry::{self, IndexedEnvelope, COORDINATE_PRECISION};
use crate::hash::{FieldHasher, HashError, NodeHash, HASH_SCHEME};
use crate::leaf::{Canonicalizer, MerkleLeaf};
use crate::merkle::{AtlasCommitment, InclusionProof, LayerTree, COMBINATION_SCHEME_VERSION};
use crate::tessellation::TessellationReport;
use crate::types::{Finding, FindingKind, LayerKey, NormalizedDistrict};

/// A stored snapshot does not match what its contents hash to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// Unknown combination scheme or hash family.
    #[error("Unsupported scheme: version {scheme_version}, hash {hash_scheme}")]
    UnsupportedScheme {
        /// Recorded combination scheme version.
        scheme_version: u32,
        /// Recorded hash family.
        hash_scheme: String,
    },
    /// A layer is filed under a key its contents disagree with.
    #[error("Layer {layer} is inconsistent: {reason}")]
    LayerInconsistent {
        /// Layer key.
        layer: String,
        /// What is wrong.
        reason: String,
    },
    /// Recomputed layer root differs from the recorded one.
    #[error("Layer {layer} root mismatch: recorded {expected}, computed {computed}")]
    LayerRootMismatch {
        /// Layer key.
        layer: String,
        /// Recorded root.
        expected: NodeHash,
        /// Recomputed root.
        computed: NodeHash,
    },
    /// Recomputed top-level root differs from the recorded one.
    #[error("Snapshot {generation} root mismatch: recorded {expected}, computed {computed}")]
    RootMismatch {
        /// Generation.
        generation: u64,
        /// Recorded root.
        expected: NodeHash,
        /// Recomputed root.
        computed: NodeHash,
    },
    /// Recorded district count differs from the layers.
    #[error("Snapshot {generation} records {recorded} districts, layers hold {actual}")]
    CountMismatch {
        /// Generation.
        generation: u64,
        /// Recorded count.
        recorded: usize,
        /// Actual count.
        actual: usize,
    },
    /// Recorded hashes could not be decoded.
    #[error("Hash error during verification: {0}")]
    Hash(#[from] HashError),
}

/// One admitted layer.
#[derive(Serialize, Deserialize)]
pub struct AtlasLayer {
    /// Layer key.
    pub key: LayerKey,
    /// Districts sorted by id.
    pub districts: Vec<NormalizedDistrict>,
    /// Leaves, aligned with `districts`.
    pub leaves: Vec<MerkleLeaf>,
    /// Layer tree over `leaves`.
    pub tree: LayerTree,
    /// Tessellation report that admitted the layer.
    pub report: TessellationReport,
    /// Fingerprint of the parent boundary the layer was validated against.
    pub boundary_fingerprint: Option<String>,
    #[serde(skip)]
    index: OnceLock<RTree<IndexedEnvelope>>,
}

impl std::fmt::Debug for AtlasLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasLayer")
            .field("key", &self.key)
            .field("districts", &self.districts.len())
            .field("root", &self.root())
            .field("verdict", &self.report.verdict)
            .finish_non_exhaustive()
    }
}

impl AtlasLayer {
    /// Canonicalize sorted districts and build the layer tree.
    pub fn build(
        key: LayerKey,
        districts: Vec<NormalizedDistrict>,
        report: TessellationReport,
        parent_boundary: Option<&MultiPolygon<f64>>,
    ) -> Result<Self, HashError> {
        let mut canonicalizer = Canonicalizer::new();
        let leaves = districts
            .iter()
            .map(|d| canonicalizer.leaf(d))
            .collect::<Result<Vec<_>, _>>()?;
        let tree = LayerTree::build(leaves.iter().map(|l| l.hash).collect(), &mut FieldHasher::new())?;

        Ok(Self {
            key,
            districts,
            leaves,
            tree,
            report,
            boundary_fingerprint: parent_boundary.map(boundary_fingerprint),
            index: OnceLock::new(),
        })
    }

    /// Layer root.
    pub fn root(&self) -> NodeHash {
        self.tree.root()
    }

    /// Number of districts.
    pub fn len(&self) -> usize {
        self.districts.len()
    }

    /// Whether the layer has no districts.
    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// Position of a district in the sorted layer.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.districts.binary_search_by(|d| d.id.as_str().cmp(id)).ok()
    }

    /// District by id.
    pub fn district(&self, id: &str) -> Option<&NormalizedDistrict> {
        self.position(id).map(|i| &self.districts[i])
    }

    /// Districts strictly containing a point: bbox prune, then exact test.
    pub fn containing(&self, longitude: f64, latitude: f64) -> Vec<&NormalizedDistrict> {
        let index = self.index.get_or_init(|| {
            RTree::bulk_load(
                self.districts
                    .iter()
                    .enumerate()
                    .map(|(idx, d)| IndexedEnvelope { idx, bbox: d.bbox })
                    .collect(),
            )
        });
        let probe = AABB::from_point([longitude, latitude]);
        let mut hits: Vec<&NormalizedDistrict> = index
            .locate_in_envelope_intersecting(&probe)
            .map(|e| &self.districts[e.idx])
            .filter(|d| geometry::contains_point(&d.geometry, longitude, latitude))
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits
    }

    /// Recompute leaves and root from the districts.
    fn recompute(&self, key: &LayerKey) -> Result<NodeHash, IntegrityError> {
        let inconsistent = |reason: String| IntegrityError::LayerInconsistent {
            layer: key.to_string(),
            reason,
        };
        if &self.key != key {
            return Err(inconsistent(format!("filed under {key}, declares {}", self.key)));
        }
        if self.districts.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(inconsistent("districts not strictly sorted by id".to_string()));
        }
        if let Some(d) = self.districts.iter().find(|d| &d.layer_key() != key) {
            return Err(inconsistent(format!("district {} belongs to {}", d.id, d.layer_key())));
        }
        if let Some(d) = self.districts.iter().find(|d| !d.has_consistent_bbox()) {
            return Err(inconsistent(format!("district {} has a stale bounding box", d.id)));
        }

        let mut canonicalizer = Canonicalizer::new();
        let mut leaf_hashes = Vec::with_capacity(self.districts.len());
        for d in &self.districts {
            leaf_hashes.push(canonicalizer.leaf(d)?.hash);
        }
        let recorded: Vec<NodeHash> = self.leaves.iter().map(|l| l.hash).collect();
        if leaf_hashes != recorded || self.tree.leaves() != recorded.as_slice() {
            return Err(inconsistent("leaves do not match districts".to_string()));
        }

        let computed = LayerTree::build(leaf_hashes, &mut FieldHasher::new())?.root();
        if computed != self.tree.root() {
            return Err(IntegrityError::LayerRootMismatch {
                layer: key.to_string(),
                expected: self.tree.root(),
                computed,
            });
        }
        Ok(computed)
    }
}

/// One generation of the atlas.
#[derive(Debug, Serialize, Deserialize)]
pub struct AtlasSnapshot {
    /// Combination scheme version.
    pub scheme_version: u32,
    /// Hash family of every tree node.
    pub hash_scheme: String,
    /// Decimal places coordinates are rounded to in leaves.
    pub coordinate_precision: u32,
    /// Generation id, strictly increasing per store.
    pub generation: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Admitted layers by key.
    pub layers: BTreeMap<LayerKey, Arc<AtlasLayer>>,
    /// Combination of layer roots.
    pub commitment: AtlasCommitment,
    /// Top-level root.
    pub root: NodeHash,
    /// Districts across all layers.
    pub total_districts: usize,
}

impl AtlasSnapshot {
    /// Combine layers into a snapshot.
    pub fn assemble(
        generation: u64,
        layers: BTreeMap<LayerKey, Arc<AtlasLayer>>,
    ) -> Result<Self, HashError> {
        let commitment = AtlasCommitment::build(
            layers
                .iter()
                .map(|(k, l)| (k.clone(), l.root(), l.len() as u64)),
            &mut FieldHasher::new(),
        )?;
        let total_districts = layers.values().map(|l| l.len()).sum();

        Ok(Self {
            scheme_version: commitment.scheme_version,
            hash_scheme: HASH_SCHEME.to_string(),
            coordinate_precision: COORDINATE_PRECISION,
            generation,
            created_at: Utc::now(),
            root: commitment.root,
            commitment,
            layers,
            total_districts,
        })
    }

    /// Layer by key.
    pub fn layer(&self, key: &LayerKey) -> Option<&Arc<AtlasLayer>> {
        self.layers.get(key)
    }

    /// Inclusion proof for a district.
    pub fn prove(&self, key: &LayerKey, district_id: &str) -> Option<InclusionProof> {
        let layer = self.layers.get(key)?;
        let leaf_index = layer.position(district_id)?;
        let (layer_index, layer_path) = self.commitment.layer_path(key)?;
        let (_, entry) = self.commitment.entry(key)?;

        Some(InclusionProof {
            scheme_version: self.scheme_version,
            layer_key: key.clone(),
            district_id: district_id.to_string(),
            leaf_hash: layer.leaves[leaf_index].hash,
            leaf_index,
            leaf_path: layer.tree.path(leaf_index)?,
            layer_root: layer.root(),
            leaf_count: entry.leaf_count,
            layer_key_digest: entry.key_digest,
            layer_index,
            layer_path,
        })
    }

    /// Recompute every leaf and root and compare with the recorded values.
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        let result = self.recompute();
        if let Err(err) = &result {
            let computed = match err {
                IntegrityError::RootMismatch { computed, .. } => computed.to_string(),
                other => other.to_string(),
            };
            Finding::new(
                FindingKind::IntegrityFailure {
                    generation: self.generation,
                    expected_root: self.root.to_string(),
                    computed_root: computed,
                },
                None,
            )
            .log();
        }
        result
    }

    fn recompute(&self) -> Result<(), IntegrityError> {
        if self.scheme_version != COMBINATION_SCHEME_VERSION
            || self.hash_scheme != HASH_SCHEME
            || self.coordinate_precision != COORDINATE_PRECISION
        {
            return Err(IntegrityError::UnsupportedScheme {
                scheme_version: self.scheme_version,
                hash_scheme: self.hash_scheme.clone(),
            });
        }

        let roots = self
            .layers
            .par_iter()
            .map(|(key, layer)| Ok((key.clone(), layer.recompute(key)?, layer.len() as u64)))
            .collect::<Result<Vec<_>, IntegrityError>>()?;

        let actual: usize = self.layers.values().map(|l| l.len()).sum();
        if actual != self.total_districts {
            return Err(IntegrityError::CountMismatch {
                generation: self.generation,
                recorded: self.total_districts,
                actual,
            });
        }

        let commitment = AtlasCommitment::build(roots, &mut FieldHasher::new())?;
        if commitment.root != self.root || commitment != self.commitment {
            return Err(IntegrityError::RootMismatch {
                generation: self.generation,
                expected: self.root,
                computed: commitment.root,
            });
        }
        Ok(())
    }

    /// Portable summary.
    pub fn manifest(&self) -> SnapshotManifest {
        SnapshotManifest {
            scheme_version: self.scheme_version,
            hash_scheme: self.hash_scheme.clone(),
            generation: self.generation,
            created_at: self.created_at,
            layers: self
                .commitment
                .entries
                .iter()
                .map(|e| ManifestLayer {
                    layer_key: e.key.clone(),
                    root: e.root,
                    leaf_count: e.leaf_count,
                })
                .collect(),
            root: self.root,
            total_districts: self.total_districts,
        }
    }
}

/// A layer line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLayer {
    /// Layer key.
    pub layer_key: LayerKey,
    /// Layer root.
    pub root: NodeHash,
    /// Leaves in the layer.
    pub leaf_count: u64,
}

/// Portable summary of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Combination scheme version.
    pub scheme_version: u32,
    /// Hash family.
    pub hash_scheme: String,
    /// Generation id.
    pub generation: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Layers in key order.
    pub layers: Vec<ManifestLayer>,
    /// Top-level root.
    pub root: NodeHash,
    /// Districts across all layers.
    pub total_districts: usize,
}

impl SnapshotManifest {
    /// Canonical JSON bytes.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        to_canonical_bytes(self)
    }

    /// xxh64 fingerprint of the canonical bytes.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        canonical_hash_hex(self)
    }

    /// Recompute the root from the layer lines alone.
    pub fn verify_root(&self) -> Result<bool, HashError> {
        if self.scheme_version != COMBINATION_SCHEME_VERSION || self.hash_scheme != HASH_SCHEME {
            return Ok(false);
        }
        let commitment = AtlasCommitment::build(
            self.layers
                .iter()
                .map(|l| (l.layer_key.clone(), l.root, l.leaf_count)),
            &mut FieldHasher::new(),
        )?;
        Ok(commitment.root == self.root)
    }
}

//! Layer trees, the multi-layer combination and inclusion proofs.
//!
//! ```text
//!                         ROOT = P2(scheme version, combination root)
//!                                    |
//!                    combination tree over layer entries
//!                  (sorted by layer key, last entry duplicated on odd levels)
//!                   /                                   \
//!   entry = P4(LAYER_TAG, key digest, layer root, n)    ...
//!                   |
//!        layer tree over leaves sorted by district id
//!         /        \
//!      P2(l, r)   P2(l, r)
//!       / \        / \
//!     leaf leaf  leaf leaf
//! ```
//!
//! Both levels use the same binary tree: an odd level duplicates its last
//! node; an empty tree has root [`NodeHash::ZERO`]; a single leaf is its own
//! root. A proof is the sibling path through the layer tree followed by the
//! sibling path through the combination tree, enough to recompute `ROOT`
//! from the leaf alone.

use serde::{Deserialize, Serialize};

use crate::hash::{fe_u64, FieldHasher, HashError, NodeHash};
use crate::leaf::Canonicalizer;
use crate::types::{LayerKey, NormalizedDistrict};

/// Version of the combination scheme. Stored in every snapshot and proof.
pub const COMBINATION_SCHEME_VERSION: u32 = 1;

/// Leading tag of every layer entry.
pub const LAYER_TAG: u64 = 2;

/// Which side the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is the left input; the running hash is the right.
    Left,
    /// Sibling is the right input.
    Right,
}

/// One step of a Merkle path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash.
    pub sibling: NodeHash,
    /// Position of the sibling.
    pub side: Side,
}

/// Binary Merkle tree; `levels[0]` are the leaves, the last level is the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTree {
    levels: Vec<Vec<NodeHash>>,
}

impl LayerTree {
    /// Build a tree over leaves in the given order.
    pub fn build(leaves: Vec<NodeHash>, hasher: &mut FieldHasher) -> Result<Self, HashError> {
        let mut levels = vec![leaves];
        loop {
            let Some(current) = levels.last() else { break };
            if current.len() <= 1 {
                break;
            }
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(hasher.node(left, right)?);
            }
            levels.push(next);
        }
        Ok(Self { levels })
    }

    /// Root hash.
    pub fn root(&self) -> NodeHash {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(NodeHash::ZERO)
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Leaves in tree order.
    pub fn leaves(&self) -> &[NodeHash] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Path length from a leaf to the root.
    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Sibling path for the leaf at `index`.
    pub fn path(&self, index: usize) -> Option<Vec<ProofStep>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut idx = index;
        let mut path = Vec::with_capacity(self.depth());
        for level in &self.levels[..self.depth()] {
            let (sibling_idx, side) = if idx % 2 == 0 {
                (idx + 1, Side::Right)
            } else {
                (idx - 1, Side::Left)
            };
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            path.push(ProofStep { sibling, side });
            idx /= 2;
        }
        Some(path)
    }
}

/// Fold a leaf up a sibling path.
pub fn fold_path(
    hasher: &mut FieldHasher,
    leaf: NodeHash,
    path: &[ProofStep],
) -> Result<NodeHash, HashError> {
    path.iter().try_fold(leaf, |acc, step| match step.side {
        Side::Left => hasher.node(&step.sibling, &acc),
        Side::Right => hasher.node(&acc, &step.sibling),
    })
}

/// Check that a path's sides are the binary expansion of `index`.
fn path_matches_index(path: &[ProofStep], index: usize) -> bool {
    let mut idx = index;
    for step in path {
        let expected = if idx % 2 == 0 { Side::Right } else { Side::Left };
        if step.side != expected {
            return false;
        }
        idx /= 2;
    }
    idx == 0
}

/// Digest of a layer key.
pub fn layer_key_digest(hasher: &mut FieldHasher, key: &LayerKey) -> Result<NodeHash, HashError> {
    Ok(NodeHash::from_field(hasher.string(&key.to_string())?))
}

/// Hash of one layer entry in the combination tree.
pub fn layer_entry_hash(
    hasher: &mut FieldHasher,
    key_digest: &NodeHash,
    layer_root: &NodeHash,
    leaf_count: u64,
) -> Result<NodeHash, HashError> {
    let h = hasher.hash(&[
        fe_u64(LAYER_TAG),
        key_digest.to_field()?,
        layer_root.to_field()?,
        fe_u64(leaf_count),
    ])?;
    Ok(NodeHash::from_field(h))
}

/// Final root: the combination tree root bound to the scheme version.
pub fn wrap_root(
    hasher: &mut FieldHasher,
    scheme_version: u32,
    combination_root: &NodeHash,
) -> Result<NodeHash, HashError> {
    let h = hasher.hash2(fe_u64(u64::from(scheme_version)), combination_root.to_field()?)?;
    Ok(NodeHash::from_field(h))
}

/// One layer's position in the combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Layer key.
    pub key: LayerKey,
    /// Digest of the key.
    pub key_digest: NodeHash,
    /// Root of the layer tree.
    pub root: NodeHash,
    /// Leaves in the layer tree.
    pub leaf_count: u64,
    /// Entry hash, a leaf of the combination tree.
    pub hash: NodeHash,
}

/// The combination of all layer roots into one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasCommitment {
    /// Combination scheme version.
    pub scheme_version: u32,
    /// Layer entries sorted by key.
    pub entries: Vec<LayerEntry>,
    tree: LayerTree,
    /// Top-level root.
    pub root: NodeHash,
}

impl AtlasCommitment {
    /// Combine `(key, layer root, leaf count)` triples. Order of input is
    /// irrelevant; entries are sorted by key.
    pub fn build<I>(layers: I, hasher: &mut FieldHasher) -> Result<Self, HashError>
    where
        I: IntoIterator<Item = (LayerKey, NodeHash, u64)>,
    {
        let mut layers: Vec<_> = layers.into_iter().collect();
        layers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(layers.len());
        for (key, root, leaf_count) in layers {
            let key_digest = layer_key_digest(hasher, &key)?;
            let hash = layer_entry_hash(hasher, &key_digest, &root, leaf_count)?;
            entries.push(LayerEntry {
                key,
                key_digest,
                root,
                leaf_count,
                hash,
            });
        }

        let tree = LayerTree::build(entries.iter().map(|e| e.hash).collect(), hasher)?;
        let root = wrap_root(hasher, COMBINATION_SCHEME_VERSION, &tree.root())?;
        Ok(Self {
            scheme_version: COMBINATION_SCHEME_VERSION,
            entries,
            tree,
            root,
        })
    }

    /// Index and entry of a layer.
    pub fn entry(&self, key: &LayerKey) -> Option<(usize, &LayerEntry)> {
        let idx = self.entries.binary_search_by(|e| e.key.cmp(key)).ok()?;
        Some((idx, &self.entries[idx]))
    }

    /// Sibling path of a layer entry through the combination tree.
    pub fn layer_path(&self, key: &LayerKey) -> Option<(usize, Vec<ProofStep>)> {
        let (idx, _) = self.entry(key)?;
        Some((idx, self.tree.path(idx)?))
    }
}

/// Everything needed to recompute the top-level root from one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Combination scheme the proof was produced under.
    pub scheme_version: u32,
    /// Layer the district belongs to.
    pub layer_key: LayerKey,
    /// District id.
    pub district_id: String,
    /// Leaf hash of the district.
    pub leaf_hash: NodeHash,
    /// Position of the leaf in the layer tree.
    pub leaf_index: usize,
    /// Siblings from leaf to layer root.
    pub leaf_path: Vec<ProofStep>,
    /// Root of the layer tree.
    pub layer_root: NodeHash,
    /// Leaves in the layer tree.
    pub leaf_count: u64,
    /// Digest of the layer key.
    pub layer_key_digest: NodeHash,
    /// Position of the layer in the combination tree.
    pub layer_index: usize,
    /// Siblings from layer entry to combination root.
    pub layer_path: Vec<ProofStep>,
}

impl InclusionProof {
    /// Recompute the top-level root this proof commits to.
    ///
    /// The layer root and key digest are recomputed rather than trusted.
    pub fn compute_root(&self) -> Result<NodeHash, HashError> {
        let mut hasher = FieldHasher::new();
        let layer_root = fold_path(&mut hasher, self.leaf_hash, &self.leaf_path)?;
        let key_digest = layer_key_digest(&mut hasher, &self.layer_key)?;
        let entry = layer_entry_hash(&mut hasher, &key_digest, &layer_root, self.leaf_count)?;
        let combination_root = fold_path(&mut hasher, entry, &self.layer_path)?;
        wrap_root(&mut hasher, self.scheme_version, &combination_root)
    }

    /// Check the proof against a trusted top-level root.
    pub fn verify(&self, root: &NodeHash) -> bool {
        if self.scheme_version != COMBINATION_SCHEME_VERSION
            || (self.leaf_index as u64) >= self.leaf_count
            || !path_matches_index(&self.leaf_path, self.leaf_index)
            || !path_matches_index(&self.layer_path, self.layer_index)
        {
            return false;
        }

        let mut hasher = FieldHasher::new();
        let recomputed = fold_path(&mut hasher, self.leaf_hash, &self.leaf_path)
            .and_then(|layer_root| {
                let key_digest = layer_key_digest(&mut hasher, &self.layer_key)?;
                Ok((layer_root, key_digest))
            });
        match recomputed {
            Ok((layer_root, key_digest))
                if layer_root == self.layer_root && key_digest == self.layer_key_digest => {}
            _ => return false,
        }

        matches!(self.compute_root(), Ok(computed) if computed == *root)
    }
}

/// Verify that a district record is committed under `root` by `proof`.
pub fn verify_claim(
    district: &NormalizedDistrict,
    proof: &InclusionProof,
    root: &NodeHash,
) -> Result<bool, HashError> {
    let leaf = Canonicalizer::new().leaf(district)?;
    Ok(leaf.hash == proof.leaf_hash
        && leaf.district_id == proof.district_id
        && district.layer_key() == proof.layer_key
        && proof.verify(root))
}

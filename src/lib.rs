//! # district-atlas
//!
//! Verifiable atlas of administrative district boundaries.
//!
//! The atlas answers one question:
//!
//! > Which districts contain this point, and can you prove it?
//!
//! ## Core Contract
//!
//! 1. Every layer admitted to a snapshot tessellates its parent boundary
//!    within tolerance
//! 2. Every district is committed to a Poseidon Merkle tree whose root is
//!    reproducible from the inputs alone
//! 3. Every lookup result carries an inclusion proof against the snapshot root
//!
//! ## Architecture
//!
//! ```text
//! NormalizedDistrict → TessellationValidator → Canonicalizer → LayerTree
//!                                                                 ↓
//!            AtlasService ← SnapshotStore ← AtlasSnapshot ← AtlasCommitment
//!                 ↓
//!         lookup / prove / diff
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same admitted districts → identical root, whatever the input order
//! - Layers are combined in `LayerKey` order
//! - An incremental build equals a full rebuild

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod geometry;
pub mod config;
pub mod tessellation;
pub mod hash;
pub mod leaf;
pub mod merkle;
pub mod diff;
pub mod canonical;
pub mod atlas;
pub mod store;
pub mod error;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    DistrictType, Finding, FindingKind, Jurisdiction, LayerKey, LayerKeyError, NormalizedDistrict,
    Provenance, ProvenanceBuilder, ProvenanceError, RetrievalMethod, Severity,
};
pub use geometry::{AreaMetric, BoundingBox, GeometryError, COORDINATE_PRECISION};
pub use config::{AtlasConfig, ConfigError, TessellationConfig};
pub use tessellation::{
    OverlapMatrix, OverlapPair, TessellationError, TessellationReport, TessellationValidator, Verdict,
};
pub use hash::{FieldHasher, HashError, NodeHash, HASH_SCHEME};
pub use leaf::{canonicalize, Canonicalizer, MerkleLeaf};
pub use merkle::{verify_claim, AtlasCommitment, InclusionProof, LayerTree, ProofStep, Side};
pub use diff::{ChangedField, DiffEngine, DiffError, DiffReport, ModifiedDistrict, SnapshotDiff};
pub use canonical::{boundary_fingerprint, canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use atlas::{
    AtlasBuilder, AtlasService, AtlasSnapshot, BuildOutcome, BuildStatus, BuildSummary, CancelToken,
    DistrictClaim, IntegrityError, LayerBuildError, LayerInput, LookupError, LookupResult,
    SnapshotManifest,
};
pub use store::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
pub use error::AtlasError;

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

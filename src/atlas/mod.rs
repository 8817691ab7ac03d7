//! Atlas: versioned, verifiable snapshots of every district layer.
//!
//! A build takes a complete batch of layers, validates each layer's
//! tessellation, commits every admitted layer to its own Poseidon Merkle
//! tree and combines the layer roots into one top-level root:
//!
//! ```text
//! LayerInput ──► AtlasBuilder ──► AtlasLayer (tree + report) ──┐
//!     │               │                                        ├──► AtlasSnapshot ──► SnapshotStore
//!     │               └── reuse from previous snapshot ────────┘         │
//!     │                                                                  ▼
//!     └───────────────────────── AtlasService ◄──── lookup / prove / diff
//! ```
//!
//! ## Core Contract
//!
//! Given the same admitted layers, any build produces the same root,
//! regardless of input order, thread count, or whether a previous snapshot
//! was available for reuse.

pub mod builder;
pub mod orchestrator;
pub mod snapshot;

pub use builder::{
    AtlasBuilder, BuildOutcome, BuildStatus, BuildSummary, CancelToken, LayerBuildError, LayerInput,
};
pub use orchestrator::{AtlasService, DistrictClaim, LookupError, LookupResult};
pub use snapshot::{AtlasLayer, AtlasSnapshot, IntegrityError, ManifestLayer, SnapshotManifest};

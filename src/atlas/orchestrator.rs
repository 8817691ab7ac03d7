//! Atlas service: build, commit, lookup and diff over a snapshot store.
//!
//! ## Concurrency
//!
//! The current snapshot is an `Arc` behind a `RwLock` that is only held for
//! a pointer read or a pointer swap. A build reads the pointer once, does
//! all its work lock-free against that immutable snapshot, then takes the
//! commit lock, checks that no other build committed in the meantime,
//! persists the new snapshot and swaps the pointer. Readers see either the
//! old or the new snapshot, never anything in between. A build that is
//! cancelled or loses the race leaves the committed state untouched.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::builder::{AtlasBuilder, BuildOutcome, CancelToken, LayerInput};
use super::snapshot::AtlasSnapshot;
use crate::config::AtlasConfig;
use crate::diff::{DiffEngine, DiffReport, SnapshotDiff};
use crate::error::AtlasError;
use crate::hash::NodeHash;
use crate::merkle::InclusionProof;
use crate::store::SnapshotStore;
use crate::types::{Finding, FindingKind, Jurisdiction, LayerKey};

/// A district a point falls in, with its inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictClaim {
    /// Layer of the district.
    pub layer_key: LayerKey,
    /// District id.
    pub district_id: String,
    /// Display name.
    pub name: String,
    /// Jurisdiction path.
    pub jurisdiction: Jurisdiction,
    /// Snapshot generation the proof is against.
    pub generation: u64,
    /// Top-level root the proof recomputes to.
    pub root: NodeHash,
    /// Inclusion proof.
    pub proof: Arc<InclusionProof>,
}

/// Outcome of a point lookup. A point outside every boundary is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "claims", rename_all = "snake_case")]
pub enum LookupResult {
    /// One claim per layer containing the point, in layer key order.
    Found(Vec<DistrictClaim>),
    /// No requested layer contains the point.
    NotFound,
}

impl LookupResult {
    /// Claims, empty when not found.
    pub fn claims(&self) -> &[DistrictClaim] {
        match self {
            Self::Found(claims) => claims,
            Self::NotFound => &[],
        }
    }
}

/// Lookup failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    /// Nothing has been committed yet.
    #[error("No snapshot has been committed")]
    NoSnapshot,
    /// Latitude or longitude out of range or not finite.
    #[error("Invalid point: latitude {latitude}, longitude {longitude}")]
    InvalidPoint {
        /// Latitude.
        latitude: f64,
        /// Longitude.
        longitude: f64,
    },
    /// A filtered layer is not in the snapshot.
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerKey),
    /// The point lies in more than one district of one layer.
    #[error("Point lies in {} districts of layer {layer}: {}", .district_ids.len(), .district_ids.join(", "))]
    Collision {
        /// Layer with the collision.
        layer: LayerKey,
        /// All matching districts.
        district_ids: Vec<String>,
    },
    /// A matched district could not be proven.
    #[error("Could not prove district {district_id} in layer {layer}")]
    Proof {
        /// Layer.
        layer: LayerKey,
        /// District id.
        district_id: String,
    },
}

type ProofKey = (u64, LayerKey, String);

/// Orchestrates builds and queries over a snapshot store.
pub struct AtlasService<S: SnapshotStore> {
    config: AtlasConfig,
    builder: AtlasBuilder,
    store: Arc<S>,
    current: RwLock<Option<Arc<AtlasSnapshot>>>,
    commit_lock: Mutex<()>,
    proof_cache: Mutex<LruCache<ProofKey, Arc<InclusionProof>>>,
}

impl<S: SnapshotStore> std::fmt::Debug for AtlasService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasService")
            .field("generation", &self.current_generation())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: SnapshotStore> AtlasService<S> {
    /// Open the service, loading and verifying the latest stored snapshot.
    pub fn open(config: AtlasConfig, store: Arc<S>) -> Result<Self, AtlasError> {
        let builder = AtlasBuilder::new(&config)?;
        Self::with_builder(config, builder, store)
    }

    /// Open the service with an explicit builder.
    pub fn with_builder(
        config: AtlasConfig,
        builder: AtlasBuilder,
        store: Arc<S>,
    ) -> Result<Self, AtlasError> {
        let latest = store.latest().map_err(AtlasError::store)?;
        if let Some(snapshot) = &latest {
            snapshot.verify_integrity()?;
            info!(
                generation = snapshot.generation,
                root = %snapshot.root,
                layers = snapshot.layers.len(),
                "loaded latest snapshot"
            );
        }

        let cache_size = NonZeroUsize::new(config.proof_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            config,
            builder,
            store,
            current: RwLock::new(latest),
            commit_lock: Mutex::new(()),
            proof_cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The currently committed snapshot.
    pub fn current(&self) -> Option<Arc<AtlasSnapshot>> {
        self.current.read().clone()
    }

    /// Generation of the committed snapshot, 0 when none.
    pub fn current_generation(&self) -> u64 {
        self.current.read().as_ref().map_or(0, |s| s.generation)
    }

    /// Build from a complete batch of layers and commit the result.
    pub fn build_atlas(&self, layers: Vec<LayerInput>) -> Result<BuildOutcome, AtlasError> {
        self.build_atlas_with_cancel(layers, &CancelToken::new())
    }

    /// [`build_atlas`](Self::build_atlas) with cooperative cancellation.
    ///
    /// Cancellation is honoured between layers and immediately before commit.
    pub fn build_atlas_with_cancel(
        &self,
        layers: Vec<LayerInput>,
        cancel: &CancelToken,
    ) -> Result<BuildOutcome, AtlasError> {
        let base = self.current();
        let base_generation = base.as_ref().map_or(0, |s| s.generation);
        let generation = base_generation + 1;

        let outcome = self.builder.build(layers, base.as_deref(), generation, cancel)?;
        let Some(snapshot) = outcome.snapshot.clone() else {
            return Ok(outcome);
        };

        if cancel.is_cancelled() {
            info!(generation, "atlas build cancelled before commit");
            return Err(AtlasError::Cancelled);
        }
        self.commit(snapshot, base_generation)?;
        Ok(outcome)
    }

    fn commit(&self, snapshot: Arc<AtlasSnapshot>, base_generation: u64) -> Result<(), AtlasError> {
        let _guard = self.commit_lock.lock();

        let found = self.current_generation();
        if found != base_generation {
            warn!(expected = base_generation, found, "concurrent commit detected; discarding build");
            return Err(AtlasError::ConcurrentCommit {
                expected: base_generation,
                found,
            });
        }

        self.store.put(&snapshot).map_err(AtlasError::store)?;
        *self.current.write() = Some(Arc::clone(&snapshot));
        info!(
            generation = snapshot.generation,
            root = %snapshot.root,
            districts = snapshot.total_districts,
            "atlas snapshot committed"
        );
        Ok(())
    }

    /// Snapshot by generation, from memory or the store.
    pub fn snapshot(&self, generation: u64) -> Result<Arc<AtlasSnapshot>, AtlasError> {
        if let Some(current) = self.current() {
            if current.generation == generation {
                return Ok(current);
            }
        }
        let snapshot = self
            .store
            .get(generation)
            .map_err(AtlasError::store)?
            .ok_or(AtlasError::UnknownGeneration(generation))?;
        snapshot.verify_integrity()?;
        Ok(snapshot)
    }

    /// Find the districts containing a point, with proofs.
    ///
    /// `layers` restricts the search; `None` searches every layer. A point on
    /// a shared boundary is contained by neither side.
    pub fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
        layers: Option<&[LayerKey]>,
    ) -> Result<LookupResult, LookupError> {
        let snapshot = self.current().ok_or(LookupError::NoSnapshot)?;
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(LookupError::InvalidPoint {
                latitude,
                longitude,
            });
        }

        let keys: Vec<&LayerKey> = match layers {
            Some(filter) => {
                let mut keys = Vec::with_capacity(filter.len());
                for key in filter {
                    if !snapshot.layers.contains_key(key) {
                        return Err(LookupError::UnknownLayer(key.clone()));
                    }
                    keys.push(key);
                }
                keys.sort();
                keys.dedup();
                keys
            }
            None => snapshot.layers.keys().collect(),
        };

        let mut claims = Vec::new();
        for key in keys {
            let Some(layer) = snapshot.layers.get(key) else {
                continue;
            };
            let hits = layer.containing(longitude, latitude);
            match hits.as_slice() {
                [] => {}
                [district] => {
                    let proof = self.proof(&snapshot, key, &district.id)?;
                    claims.push(DistrictClaim {
                        layer_key: key.clone(),
                        district_id: district.id.clone(),
                        name: district.name.clone(),
                        jurisdiction: district.jurisdiction.clone(),
                        generation: snapshot.generation,
                        root: snapshot.root,
                        proof,
                    });
                }
                many => {
                    let district_ids: Vec<String> = many.iter().map(|d| d.id.clone()).collect();
                    Finding::new(
                        FindingKind::LookupCollision {
                            district_ids: district_ids.clone(),
                            latitude,
                            longitude,
                        },
                        Some(key.to_string()),
                    )
                    .log();
                    return Err(LookupError::Collision {
                        layer: key.clone(),
                        district_ids,
                    });
                }
            }
        }

        if claims.is_empty() {
            Ok(LookupResult::NotFound)
        } else {
            Ok(LookupResult::Found(claims))
        }
    }

    /// Inclusion proof for a district of the current snapshot.
    pub fn prove(&self, key: &LayerKey, district_id: &str) -> Result<Arc<InclusionProof>, LookupError> {
        let snapshot = self.current().ok_or(LookupError::NoSnapshot)?;
        if !snapshot.layers.contains_key(key) {
            return Err(LookupError::UnknownLayer(key.clone()));
        }
        self.proof(&snapshot, key, district_id)
    }

    fn proof(
        &self,
        snapshot: &AtlasSnapshot,
        key: &LayerKey,
        district_id: &str,
    ) -> Result<Arc<InclusionProof>, LookupError> {
        let cache_key = (snapshot.generation, key.clone(), district_id.to_string());
        if let Some(proof) = self.proof_cache.lock().get(&cache_key) {
            return Ok(Arc::clone(proof));
        }

        let proof = snapshot
            .prove(key, district_id)
            .map(Arc::new)
            .ok_or_else(|| {
                error!(layer = %key, district_id, "committed district has no proof");
                LookupError::Proof {
                    layer: key.clone(),
                    district_id: district_id.to_string(),
                }
            })?;
        self.proof_cache.lock().put(cache_key, Arc::clone(&proof));
        Ok(proof)
    }

    /// District-level diff between two generations.
    pub fn diff(&self, from_generation: u64, to_generation: u64) -> Result<SnapshotDiff, AtlasError> {
        let from = self.snapshot(from_generation)?;
        let to = self.snapshot(to_generation)?;
        let engine = DiffEngine::new(self.config.tessellation.area_metric);

        let mut diff = SnapshotDiff {
            from_generation,
            to_generation,
            ..SnapshotDiff::default()
        };

        for (key, before) in &from.layers {
            match to.layers.get(key) {
                Some(after) => {
                    if Arc::ptr_eq(before, after) {
                        continue;
                    }
                    let report = engine.diff_districts(&before.districts, &after.districts)?;
                    if !report.is_empty() {
                        diff.layers.insert(key.clone(), report);
                    }
                }
                None => {
                    diff.removed_layers.push(key.clone());
                    diff.layers.insert(
                        key.clone(),
                        DiffReport {
                            removed: before.districts.iter().map(|d| d.id.clone()).collect(),
                            ..DiffReport::default()
                        },
                    );
                }
            }
        }
        for (key, after) in &to.layers {
            if !from.layers.contains_key(key) {
                diff.added_layers.push(key.clone());
                diff.layers.insert(
                    key.clone(),
                    DiffReport {
                        added: after.districts.iter().map(|d| d.id.clone()).collect(),
                        ..DiffReport::default()
                    },
                );
            }
        }

        info!(
            from = from_generation,
            to = to_generation,
            changed_layers = diff.layers.len(),
            "snapshot diff computed"
        );
        Ok(diff)
    }
}

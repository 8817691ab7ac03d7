//! Atlas builder: validation gate, canonicalization and tree construction.
//!
//! ## Pipeline per layer
//!
//! | Step | Failure |
//! |------|---------|
//! | Every district belongs to the layer key | `LayerMismatch` |
//! | Ids unique within the layer | `DuplicateIds` |
//! | Cached bbox matches geometry | `StaleBbox` |
//! | Unchanged since the previous snapshot? reuse its tree | (none) |
//! | Tessellation validation | `Tessellation`, `TessellationFailed` |
//! | Canonicalize sorted districts, build the layer tree | `Hash` |
//!
//! Layers run concurrently on the builder's bounded pool; a failing layer is
//! excluded and reported without affecting the others. The batch is
//! complete: a layer of the previous snapshot that is not in the batch is
//! not carried forward.
//!
//! A layer is reused only when it was admitted under the same tessellation
//! settings, its parent boundary fingerprint is unchanged, and the diff
//! against the previous layer is empty. Every field that feeds
//! a leaf is compared by the diff, so a reused tree is identical to the one
//! a full rebuild would produce.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use geo::MultiPolygon;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::snapshot::{AtlasLayer, AtlasSnapshot};
use crate::canonical::boundary_fingerprint;
use crate::config::{AtlasConfig, ConfigError, TessellationConfig};
use crate::diff::DiffEngine;
use crate::error::AtlasError;
use crate::hash::{HashError, NodeHash};
use crate::tessellation::{TessellationError, TessellationReport, TessellationValidator, Verdict};
use crate::types::{Finding, LayerKey, NormalizedDistrict};

/// One layer of a build batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInput {
    /// Layer key every district must belong to.
    pub key: LayerKey,
    /// Boundary of the jurisdiction the layer partitions.
    pub parent_boundary: Option<MultiPolygon<f64>>,
    /// Districts in any order.
    pub districts: Vec<NormalizedDistrict>,
}

impl LayerInput {
    /// Create a layer input.
    pub fn new(
        key: LayerKey,
        parent_boundary: MultiPolygon<f64>,
        districts: Vec<NormalizedDistrict>,
    ) -> Self {
        Self {
            key,
            parent_boundary: Some(parent_boundary),
            districts,
        }
    }
}

/// Why a layer was excluded from the snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerBuildError {
    /// The same layer key appeared more than once in the batch.
    #[error("Layer appears more than once in the batch")]
    DuplicateLayer,
    /// District ids are not unique.
    #[error("Duplicate district ids: {}", .ids.join(", "))]
    DuplicateIds {
        /// Every id seen more than once.
        ids: Vec<String>,
    },
    /// A district belongs to a different layer.
    #[error("District {id} belongs to layer {found}")]
    LayerMismatch {
        /// District id.
        id: String,
        /// The district's own layer key.
        found: String,
    },
    /// A district's cached bbox is not the envelope of its geometry.
    #[error("District {id} has a stale bounding box")]
    StaleBbox {
        /// District id.
        id: String,
    },
    /// Structurally invalid input to the validator.
    #[error(transparent)]
    Tessellation(#[from] TessellationError),
    /// The tessellation verdict was `fail`.
    #[error("Tessellation failed: {} pair(s) over tolerance, max overlap {max_overlap_area_m2:.0} m²", .pairs.len())]
    TessellationFailed {
        /// Pairs over tolerance.
        pairs: Vec<(String, String)>,
        /// Largest overlap, square metres.
        max_overlap_area_m2: f64,
    },
    /// Hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Overall result of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Every layer was admitted.
    Succeeded,
    /// Some layers were excluded; a snapshot was produced from the rest.
    PartiallySucceeded,
    /// Every layer was excluded; no snapshot.
    Failed,
}

/// Everything a build produced.
#[derive(Debug)]
pub struct BuildOutcome {
    /// Overall status.
    pub status: BuildStatus,
    /// The new snapshot, absent when the build failed.
    pub snapshot: Option<Arc<AtlasSnapshot>>,
    /// Excluded layers and why.
    pub layer_errors: BTreeMap<LayerKey, LayerBuildError>,
    /// Tessellation report of every layer that got that far.
    pub reports: BTreeMap<LayerKey, TessellationReport>,
    /// Structured findings from all reports.
    pub findings: Vec<Finding>,
    /// Layers whose tree was built in this run.
    pub rebuilt_layers: Vec<LayerKey>,
    /// Layers shared unchanged with the previous snapshot.
    pub reused_layers: Vec<LayerKey>,
}

/// Serializable digest of a [`BuildOutcome`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Overall status.
    pub status: BuildStatus,
    /// Generation of the new snapshot.
    pub generation: Option<u64>,
    /// Root of the new snapshot.
    pub root: Option<NodeHash>,
    /// Districts in the new snapshot.
    pub total_districts: usize,
    /// Verdict per validated layer.
    pub verdicts: BTreeMap<LayerKey, Verdict>,
    /// Error per excluded layer.
    pub layer_errors: BTreeMap<LayerKey, String>,
    /// Rebuilt layers.
    pub rebuilt_layers: Vec<LayerKey>,
    /// Reused layers.
    pub reused_layers: Vec<LayerKey>,
    /// Findings.
    pub findings: Vec<Finding>,
}

impl BuildOutcome {
    /// Serializable summary.
    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            status: self.status,
            generation: self.snapshot.as_ref().map(|s| s.generation),
            root: self.snapshot.as_ref().map(|s| s.root),
            total_districts: self.snapshot.as_ref().map_or(0, |s| s.total_districts),
            verdicts: self
                .reports
                .iter()
                .map(|(k, r)| (k.clone(), r.verdict))
                .collect(),
            layer_errors: self
                .layer_errors
                .iter()
                .map(|(k, e)| (k.clone(), e.to_string()))
                .collect(),
            rebuilt_layers: self.rebuilt_layers.clone(),
            reused_layers: self.reused_layers.clone(),
            findings: self.findings.clone(),
        }
    }
}

/// Cooperative cancellation flag shared with a running build.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Rejection {
    report: Option<TessellationReport>,
    error: LayerBuildError,
}

impl From<LayerBuildError> for Rejection {
    fn from(error: LayerBuildError) -> Self {
        Self {
            report: None,
            error,
        }
    }
}

impl From<TessellationError> for Rejection {
    fn from(err: TessellationError) -> Self {
        LayerBuildError::from(err).into()
    }
}

impl From<HashError> for Rejection {
    fn from(err: HashError) -> Self {
        LayerBuildError::from(err).into()
    }
}

struct LayerResult {
    key: LayerKey,
    outcome: Result<(Arc<AtlasLayer>, bool), Rejection>,
}

/// Builds snapshots from layer batches.
#[derive(Debug, Clone)]
pub struct AtlasBuilder {
    tessellation: TessellationConfig,
    pool: Option<Arc<rayon::ThreadPool>>,
    parallel: bool,
}

impl AtlasBuilder {
    /// Create a builder with a bounded pool of `config.worker_threads`
    /// threads (rayon's global pool when 0).
    pub fn new(config: &AtlasConfig) -> Result<Self, ConfigError> {
        let pool = if config.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("atlas-worker-{i}"))
                .build()
                .map_err(|e| ConfigError::WorkerPool(e.to_string()))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self {
            tessellation: config.tessellation.clone(),
            pool,
            parallel: true,
        })
    }

    /// Create a builder that does all work on the calling thread.
    pub fn serial(tessellation: TessellationConfig) -> Self {
        Self {
            tessellation,
            pool: None,
            parallel: false,
        }
    }

    /// Tessellation settings in use.
    pub fn tessellation_config(&self) -> &TessellationConfig {
        &self.tessellation
    }

    /// Build a snapshot of `generation` from a complete batch of layers.
    ///
    /// With `previous`, unchanged layers share their tree with it. The
    /// result is identical to a build without `previous`.
    pub fn build(
        &self,
        layers: Vec<LayerInput>,
        previous: Option<&AtlasSnapshot>,
        generation: u64,
        cancel: &CancelToken,
    ) -> Result<BuildOutcome, AtlasError> {
        info!(
            generation,
            layers = layers.len(),
            incremental = previous.is_some(),
            "starting atlas build"
        );

        let mut key_counts: BTreeMap<LayerKey, usize> = BTreeMap::new();
        for input in &layers {
            *key_counts.entry(input.key.clone()).or_default() += 1;
        }
        let (inputs, duplicates): (Vec<_>, Vec<_>) = layers
            .into_iter()
            .partition(|input| key_counts.get(&input.key) == Some(&1));

        let run = |inputs: Vec<LayerInput>| -> Vec<Option<LayerResult>> {
            if self.parallel {
                inputs
                    .into_par_iter()
                    .map(|input| self.build_layer(input, previous, cancel))
                    .collect()
            } else {
                inputs
                    .into_iter()
                    .map(|input| self.build_layer(input, previous, cancel))
                    .collect()
            }
        };
        let results = match &self.pool {
            Some(pool) => pool.install(|| run(inputs)),
            None => run(inputs),
        };

        if cancel.is_cancelled() {
            info!(generation, "atlas build cancelled");
            return Err(AtlasError::Cancelled);
        }

        let mut outcome = BuildOutcome {
            status: BuildStatus::Succeeded,
            snapshot: None,
            layer_errors: BTreeMap::new(),
            reports: BTreeMap::new(),
            findings: Vec::new(),
            rebuilt_layers: Vec::new(),
            reused_layers: Vec::new(),
        };
        for input in duplicates {
            outcome
                .layer_errors
                .insert(input.key, LayerBuildError::DuplicateLayer);
        }

        let mut admitted: BTreeMap<LayerKey, Arc<AtlasLayer>> = BTreeMap::new();
        for result in results.into_iter().flatten() {
            let key = result.key;
            let report = match &result.outcome {
                Ok((layer, _)) => Some(layer.report.clone()),
                Err(rejection) => rejection.report.clone(),
            };
            if let Some(report) = report {
                outcome.findings.extend(report.findings(&key.to_string()));
                outcome.reports.insert(key.clone(), report);
            }

            match result.outcome {
                Ok((layer, reused)) => {
                    if reused {
                        outcome.reused_layers.push(key.clone());
                    } else {
                        outcome.rebuilt_layers.push(key.clone());
                    }
                    admitted.insert(key, layer);
                }
                Err(rejection) => {
                    warn!(layer = %key, error = %rejection.error, "layer excluded from snapshot");
                    outcome.layer_errors.insert(key, rejection.error);
                }
            }
        }
        outcome.rebuilt_layers.sort();
        outcome.reused_layers.sort();
        for finding in &outcome.findings {
            finding.log();
        }

        outcome.status = if outcome.layer_errors.is_empty() {
            BuildStatus::Succeeded
        } else if admitted.is_empty() {
            BuildStatus::Failed
        } else {
            BuildStatus::PartiallySucceeded
        };

        if outcome.status != BuildStatus::Failed {
            let snapshot = AtlasSnapshot::assemble(generation, admitted)?;
            info!(
                generation,
                root = %snapshot.root,
                layers = snapshot.layers.len(),
                districts = snapshot.total_districts,
                rebuilt = outcome.rebuilt_layers.len(),
                reused = outcome.reused_layers.len(),
                "atlas snapshot assembled"
            );
            outcome.snapshot = Some(Arc::new(snapshot));
        } else {
            warn!(generation, errors = outcome.layer_errors.len(), "atlas build failed; every layer excluded");
        }

        Ok(outcome)
    }

    fn build_layer(
        &self,
        input: LayerInput,
        previous: Option<&AtlasSnapshot>,
        cancel: &CancelToken,
    ) -> Option<LayerResult> {
        if cancel.is_cancelled() {
            return None;
        }
        let key = input.key.clone();
        let outcome = self.admit(input, previous);
        Some(LayerResult { key, outcome })
    }

    fn admit(
        &self,
        input: LayerInput,
        previous: Option<&AtlasSnapshot>,
    ) -> Result<(Arc<AtlasLayer>, bool), Rejection> {
        let LayerInput {
            key,
            parent_boundary,
            mut districts,
        } = input;

        if let Some(d) = districts.iter().find(|d| d.layer_key() != key) {
            return Err(LayerBuildError::LayerMismatch {
                id: d.id.clone(),
                found: d.layer_key().to_string(),
            }
            .into());
        }

        districts.sort_by(|a, b| a.id.cmp(&b.id));
        let mut duplicate_ids: Vec<String> = districts
            .windows(2)
            .filter(|w| w[0].id == w[1].id)
            .map(|w| w[0].id.clone())
            .collect();
        if !duplicate_ids.is_empty() {
            duplicate_ids.dedup();
            return Err(LayerBuildError::DuplicateIds { ids: duplicate_ids }.into());
        }

        if let Some(d) = districts.iter().find(|d| !d.has_consistent_bbox()) {
            return Err(LayerBuildError::StaleBbox { id: d.id.clone() }.into());
        }

        let fingerprint = parent_boundary.as_ref().map(boundary_fingerprint);
        if let Some(prev) = previous.and_then(|p| p.layer(&key)) {
            if prev.report.config != self.tessellation {
                debug!(layer = %key, "tessellation settings changed; revalidating");
            } else if fingerprint.is_some() && prev.boundary_fingerprint == fingerprint {
                let engine = DiffEngine::new(self.tessellation.area_metric);
                match engine.diff_districts(&prev.districts, &districts) {
                    Ok(diff) if diff.is_empty() => {
                        debug!(layer = %key, "layer unchanged; reusing previous tree");
                        return Ok((Arc::clone(prev), true));
                    }
                    Ok(diff) => {
                        debug!(layer = %key, changes = diff.change_count(), "layer changed; rebuilding");
                    }
                    Err(e) => {
                        debug!(layer = %key, error = %e, "layer diff failed; rebuilding");
                    }
                }
            } else {
                debug!(layer = %key, "parent boundary changed; rebuilding");
            }
        }

        let validator = if self.parallel {
            TessellationValidator::new(self.tessellation.clone())
        } else {
            TessellationValidator::serial(self.tessellation.clone())
        };
        let report = validator.validate(parent_boundary.as_ref(), &districts)?;

        if report.verdict == Verdict::Fail {
            let pairs = report
                .problematic_pairs()
                .into_iter()
                .map(|p| (p.district_a.clone(), p.district_b.clone()))
                .collect();
            return Err(Rejection {
                error: LayerBuildError::TessellationFailed {
                    pairs,
                    max_overlap_area_m2: report.max_overlap_area_m2,
                },
                report: Some(report),
            });
        }

        let layer = AtlasLayer::build(key, districts, report, parent_boundary.as_ref())?;
        Ok((Arc::new(layer), false))
    }
}

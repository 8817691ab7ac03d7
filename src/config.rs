//! Atlas configuration.
//!
//! Values come from `Default` or from environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `ATLAS_OVERLAP_TOLERANCE_M2` | `tessellation.overlap_tolerance_m2` | 150000 |
//! | `ATLAS_AREA_METRIC` | `tessellation.area_metric` | `geodesic` |
//! | `ATLAS_CHECK_SIMPLE_RINGS` | `tessellation.check_simple_rings` | `true` |
//! | `ATLAS_WORKER_THREADS` | `worker_threads` | 0 (rayon default) |
//! | `ATLAS_PROOF_CACHE_SIZE` | `proof_cache_size` | 4096 |
//! | `ATLAS_SNAPSHOT_DIR` | `snapshot_dir` | `./atlas_snapshots` |
//!
//! Coordinate precision and the hash scheme are deliberately absent: they
//! are part of the versioned commitment and cannot vary per deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::geometry::AreaMetric;

/// Default overlap tolerance between siblings, in square metres.
pub const DEFAULT_OVERLAP_TOLERANCE_M2: f64 = 150_000.0;

/// Error loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
    },
    /// The worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Tessellation validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TessellationConfig {
    /// Overlap (and containment) tolerance in square metres.
    pub overlap_tolerance_m2: f64,
    /// How areas are measured.
    pub area_metric: AreaMetric,
    /// Reject rings with crossing edges.
    pub check_simple_rings: bool,
}

impl Default for TessellationConfig {
    fn default() -> Self {
        Self {
            overlap_tolerance_m2: DEFAULT_OVERLAP_TOLERANCE_M2,
            area_metric: AreaMetric::Geodesic,
            check_simple_rings: true,
        }
    }
}

impl TessellationConfig {
    /// Settings for inputs already projected to metres.
    pub fn planar() -> Self {
        Self {
            area_metric: AreaMetric::Planar,
            ..Self::default()
        }
    }
}

/// Top-level atlas configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasConfig {
    /// Tessellation settings.
    pub tessellation: TessellationConfig,
    /// Size of the bounded worker pool; 0 uses rayon's default.
    pub worker_threads: usize,
    /// Number of inclusion proofs kept in the lookup cache.
    pub proof_cache_size: usize,
    /// Directory for the file snapshot store.
    pub snapshot_dir: PathBuf,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            tessellation: TessellationConfig::default(),
            worker_threads: 0,
            proof_cache_size: 4096,
            snapshot_dir: PathBuf::from("./atlas_snapshots"),
        }
    }
}

impl AtlasConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("ATLAS_OVERLAP_TOLERANCE_M2") {
            config.tessellation.overlap_tolerance_m2 = parse_var("ATLAS_OVERLAP_TOLERANCE_M2", &v)?;
            let tolerance = config.tessellation.overlap_tolerance_m2;
            if tolerance.is_nan() || tolerance < 0.0 {
                return Err(invalid("ATLAS_OVERLAP_TOLERANCE_M2", &v));
            }
        }
        if let Some(v) = lookup("ATLAS_AREA_METRIC") {
            config.tessellation.area_metric =
                AreaMetric::parse(&v).ok_or_else(|| invalid("ATLAS_AREA_METRIC", &v))?;
        }
        if let Some(v) = lookup("ATLAS_CHECK_SIMPLE_RINGS") {
            config.tessellation.check_simple_rings = parse_var("ATLAS_CHECK_SIMPLE_RINGS", &v)?;
        }
        if let Some(v) = lookup("ATLAS_WORKER_THREADS") {
            config.worker_threads = parse_var("ATLAS_WORKER_THREADS", &v)?;
        }
        if let Some(v) = lookup("ATLAS_PROOF_CACHE_SIZE") {
            config.proof_cache_size = parse_var("ATLAS_PROOF_CACHE_SIZE", &v)?;
        }
        if let Some(v) = lookup("ATLAS_SNAPSHOT_DIR") {
            config.snapshot_dir = PathBuf::from(v);
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

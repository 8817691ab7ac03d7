//! Errors that abort a whole atlas operation.
//!
//! Per-layer problems never appear here; they are collected in
//! [`BuildOutcome`](crate::atlas::BuildOutcome) next to the partial result.

use crate::atlas::IntegrityError;
use crate::config::ConfigError;
use crate::diff::DiffError;
use crate::hash::HashError;

/// Boxed error from a snapshot store backend.
pub type StoreErrorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Whole-operation failures.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// The snapshot store failed.
    #[error("Snapshot store error: {0}")]
    Store(#[source] StoreErrorSource),
    /// A snapshot failed integrity verification and must not be used.
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
    /// The build was cancelled before commit.
    #[error("Build cancelled before commit")]
    Cancelled,
    /// Another build committed after this one started.
    #[error("Concurrent commit: build was based on generation {expected}, current is {found}")]
    ConcurrentCommit {
        /// Generation the build started from.
        expected: u64,
        /// Generation found at commit time.
        found: u64,
    },
    /// No snapshot with this generation exists.
    #[error("Unknown generation: {0}")]
    UnknownGeneration(u64),
    /// Diff input was inconsistent.
    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),
    /// Hashing failed.
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AtlasError {
    /// Wrap a store backend error.
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }
}

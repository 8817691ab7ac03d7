//! Snapshot storage backends.

pub mod file;
pub mod memory;

use std::sync::Arc;

use crate::atlas::AtlasSnapshot;

/// Persistence for immutable snapshots, keyed by generation.
///
/// Implementations never overwrite a stored generation and return
/// generations in ascending order. Calls are synchronous; none is made while
/// holding the in-memory snapshot pointer.
pub trait SnapshotStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a snapshot. Fails if its generation already exists.
    fn put(&self, snapshot: &Arc<AtlasSnapshot>) -> Result<(), Self::Error>;

    /// Fetch a snapshot by generation.
    fn get(&self, generation: u64) -> Result<Option<Arc<AtlasSnapshot>>, Self::Error>;

    /// All stored generations, ascending.
    fn generations(&self) -> Result<Vec<u64>, Self::Error>;

    /// Highest stored generation.
    fn latest_generation(&self) -> Result<Option<u64>, Self::Error> {
        Ok(self.generations()?.last().copied())
    }

    /// Snapshot with the highest generation.
    fn latest(&self) -> Result<Option<Arc<AtlasSnapshot>>, Self::Error> {
        match self.latest_generation()? {
            Some(generation) => self.get(generation),
            None => Ok(None),
        }
    }
}

pub use file::{FileSnapshotStore, FileStoreError};
pub use memory::{InMemorySnapshotStore, InMemoryStoreError};

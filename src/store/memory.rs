//! In-memory snapshot store for tests and ephemeral services.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::SnapshotStore;
use crate::atlas::AtlasSnapshot;

/// Error type for the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryStoreError {
    /// The generation is already stored.
    #[error("Generation {0} already exists")]
    GenerationExists(u64),
}

/// In-memory snapshot store.
///
/// Uses a BTreeMap for ascending generation order.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<BTreeMap<u64, Arc<AtlasSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    type Error = InMemoryStoreError;

    fn put(&self, snapshot: &Arc<AtlasSnapshot>) -> Result<(), Self::Error> {
        let mut snapshots = self.snapshots.write();
        if snapshots.contains_key(&snapshot.generation) {
            return Err(InMemoryStoreError::GenerationExists(snapshot.generation));
        }
        snapshots.insert(snapshot.generation, Arc::clone(snapshot));
        Ok(())
    }

    fn get(&self, generation: u64) -> Result<Option<Arc<AtlasSnapshot>>, Self::Error> {
        Ok(self.snapshots.read().get(&generation).cloned())
    }

    fn generations(&self) -> Result<Vec<u64>, Self::Error> {
        Ok(self.snapshots.read().keys().copied().collect())
    }
}

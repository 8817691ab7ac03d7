//! Shared service state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::atlas::AtlasService;
use crate::store::SnapshotStore;

/// State shared by every request handler.
///
/// Cloning is cheap; all clones share one [`AtlasService`].
pub struct ServiceState<S: SnapshotStore> {
    /// The atlas orchestrator.
    pub atlas: Arc<AtlasService<S>>,
    /// When the service started.
    pub started_at: DateTime<Utc>,
}

impl<S: SnapshotStore> ServiceState<S> {
    /// Wrap an atlas service.
    pub fn new(atlas: AtlasService<S>) -> Self {
        Self {
            atlas: Arc::new(atlas),
            started_at: Utc::now(),
        }
    }

    /// Seconds since the service started.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

impl<S: SnapshotStore> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            atlas: Arc::clone(&self.atlas),
            started_at: self.started_at,
        }
    }
}

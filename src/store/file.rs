//! Snapshot store backed by one JSON file per generation.
//!
//! Files are named `snapshot-<generation, 20 digits>.json` so lexical and
//! numeric order agree. A snapshot is written to a temporary file in the same
//! directory and persisted into place without overwriting, so a reader never
//! sees a partial file and a failed write leaves nothing behind. Every load
//! is verified against its recorded root before it is returned.

use std::fs;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, error};

use super::SnapshotStore;
use crate::atlas::{AtlasSnapshot, IntegrityError};

const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".json";
const DEFAULT_CACHE_SIZE: usize = 4;

/// Error type for the file store.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed snapshot file.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The generation is already stored.
    #[error("Generation {0} already exists")]
    GenerationExists(u64),
    /// A stored snapshot failed verification.
    #[error("Snapshot {generation} failed integrity check: {source}")]
    Integrity {
        /// Generation of the file.
        generation: u64,
        /// What did not match.
        #[source]
        source: IntegrityError,
    },
}

/// File-backed snapshot store.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    cache: Mutex<LruCache<u64, Arc<AtlasSnapshot>>>,
}

impl FileSnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let cache_size = NonZeroUsize::new(DEFAULT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            dir,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for a generation.
    pub fn path_for(&self, generation: u64) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{generation:020}{FILE_SUFFIX}"))
    }

    fn parse_generation(name: &str) -> Option<u64> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }
}

/// Write `target` through a temporary file in `dir`. The temporary file is
/// removed on any error; an existing `target` is never replaced.
fn write_atomically<F>(dir: &Path, target: &Path, write: F) -> Result<(), FileStoreError>
where
    F: FnOnce(&mut fs::File) -> Result<(), FileStoreError>,
{
    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(target).map_err(|e| e.error)?;
    // Best effort: make the rename itself durable.
    if let Ok(d) = fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

impl SnapshotStore for FileSnapshotStore {
    type Error = FileStoreError;

    fn put(&self, snapshot: &Arc<AtlasSnapshot>) -> Result<(), Self::Error> {
        let path = self.path_for(snapshot.generation);
        if path.exists() {
            return Err(FileStoreError::GenerationExists(snapshot.generation));
        }

        let written = write_atomically(&self.dir, &path, |file| {
            let mut writer = io::BufWriter::new(file);
            serde_json::to_writer(&mut writer, snapshot.as_ref())?;
            writer.flush()?;
            Ok(())
        });
        match written {
            Err(FileStoreError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FileStoreError::GenerationExists(snapshot.generation));
            }
            other => other?,
        }
        debug!(generation = snapshot.generation, path = %path.display(), "snapshot written");

        self.cache.lock().put(snapshot.generation, Arc::clone(snapshot));
        Ok(())
    }

    fn get(&self, generation: u64) -> Result<Option<Arc<AtlasSnapshot>>, Self::Error> {
        if let Some(snapshot) = self.cache.lock().get(&generation) {
            return Ok(Some(Arc::clone(snapshot)));
        }

        let path = self.path_for(generation);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: AtlasSnapshot = serde_json::from_slice(&bytes)?;

        if let Err(source) = snapshot.verify_integrity() {
            error!(generation, path = %path.display(), error = %source, "stored snapshot failed integrity check");
            return Err(FileStoreError::Integrity { generation, source });
        }
        if snapshot.generation != generation {
            return Err(FileStoreError::Integrity {
                generation,
                source: IntegrityError::LayerInconsistent {
                    layer: "-".to_string(),
                    reason: format!("file records generation {}", snapshot.generation),
                },
            });
        }

        let snapshot = Arc::new(snapshot);
        self.cache.lock().put(generation, Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    fn generations(&self) -> Result<Vec<u64>, Self::Error> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(generation) = entry.file_name().to_str().and_then(Self::parse_generation) {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn empty(generation: u64) -> Arc<AtlasSnapshot> {
        Arc::new(AtlasSnapshot::assemble(generation, BTreeMap::new()).unwrap())
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        let snapshot = empty(3);
        store.put(&snapshot).unwrap();

        let reopened = FileSnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.generations().unwrap(), vec![3]);
        let loaded = reopened.get(3).unwrap().unwrap();
        assert_eq!(loaded.root, snapshot.root);
        assert!(reopened.get(4).unwrap().is_none());
    }

    #[test]
    fn test_ignores_foreign_files_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        store.put(&empty(1)).unwrap();
        assert!(matches!(
            store.put(&empty(1)),
            Err(FileStoreError::GenerationExists(1))
        ));
        assert_eq!(store.generations().unwrap(), vec![1]);
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("snapshot-00000000000000000001.json");
        let result = write_atomically(dir.path(), &target, |file| {
            file.write_all(b"{\"partial\":")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full").into())
        });
        assert!(matches!(result, Err(FileStoreError::Io(_))));
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_never_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("snapshot-00000000000000000001.json");
        fs::write(&target, b"original").unwrap();
        let result = write_atomically(dir.path(), &target, |file| {
            file.write_all(b"replacement")?;
            Ok(())
        });
        assert!(matches!(result, Err(FileStoreError::Io(ref e)) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_tampered_file_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        store.put(&empty(1)).unwrap();

        let path = store.path_for(1);
        let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        json["total_districts"] = 5.into();
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let fresh = FileSnapshotStore::open(dir.path()).unwrap();
        assert!(matches!(
            fresh.get(1),
            Err(FileStoreError::Integrity { generation: 1, .. })
        ));
    }
}

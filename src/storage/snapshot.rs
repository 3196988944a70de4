//! SnapshotStore trait — per-component state snapshots
//!
//! Each actor serializes its whole state struct to JSON and saves it under
//! its logical namespace after every mutating operation. A cold instance
//! loads the snapshot once at startup and thereafter serves from memory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

use super::StorageError;

/// Trait for pluggable snapshot backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across the three component actors.
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for a namespace, `None` on cold start
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Persist the snapshot for a namespace, replacing any previous one
    fn save(&self, namespace: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Sled-backed snapshot store
#[derive(Clone)]
pub struct SledSnapshotStore {
    tree: sled::Tree,
}

impl SledSnapshotStore {
    /// Open the snapshot tree inside an existing sled database
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("snapshots")?;
        Ok(Self { tree })
    }

    /// Open a standalone sled database at `path` and use its snapshot tree
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Snapshot store opened");
        Self::open(&db)
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(namespace)?.map(|v| v.to_vec()))
    }

    fn save(&self, namespace: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(namespace, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

/// In-memory snapshot store for tests and ephemeral deployments
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the trait-object form actors take
    pub fn shared() -> Arc<dyn SnapshotStore> {
        Arc::new(Self::new())
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self, namespace: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let store = self
            .snapshots
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(store.get(namespace).cloned())
    }

    fn save(&self, namespace: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut store = self
            .snapshots
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        store.insert(namespace.to_string(), bytes.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load("coordinator").unwrap().is_none());

        store.save("coordinator", b"{\"agents\":{}}").unwrap();
        let loaded = store.load("coordinator").unwrap();
        assert_eq!(loaded.as_deref(), Some(b"{\"agents\":{}}".as_slice()));
    }

    #[test]
    fn test_sled_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();

        {
            let store = SledSnapshotStore::open_path(tmp.path().join("db")).unwrap();
            store.save("queue", b"snapshot-v1").unwrap();
        }

        {
            let store = SledSnapshotStore::open_path(tmp.path().join("db")).unwrap();
            let loaded = store.load("queue").unwrap();
            assert_eq!(loaded.as_deref(), Some(b"snapshot-v1".as_slice()));
        }
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn SnapshotStore> = Box::new(InMemorySnapshotStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.save("healing", b"{}").unwrap();
        assert!(store.load("healing").unwrap().is_some());
    }
}

//! Durable storage for component snapshots and expiring key-value flags
//!
//! Two pluggable backends behind traits so actors and strategies never touch
//! sled directly:
//! - [`SnapshotStore`]: per-component serialized state, written synchronously
//!   after every mutating operation and lazily loaded on cold start
//! - [`KvStore`]: put-with-expiry key-value entries used for circuit-breaker
//!   flags and the credential cache
//!
//! Production uses sled; tests use the in-memory twins.

mod kv;
mod snapshot;

pub use kv::{InMemoryKvStore, KvStore, SledKvStore};
pub use snapshot::{InMemorySnapshotStore, SledSnapshotStore, SnapshotStore};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Storage(e.to_string())
    }
}

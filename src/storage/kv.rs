//! Expiring key-value store — circuit-breaker flags and credential cache
//!
//! Entries carry an optional absolute expiry. `get` treats an expired entry
//! as absent; `sweep_expired` physically removes elapsed entries so breaker
//! flags disappear once their cooldown ends.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::StorageError;

/// Stored entry: value plus optional absolute expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvEntry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl KvEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Trait for the expiring key-value collaborator
pub trait KvStore: Send + Sync {
    /// Store a value, optionally expiring after `ttl`
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Fetch a value; expired entries read as `None`
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// Remove a key, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Remove every key with the given prefix, returning the count removed
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Count live (unexpired) keys with the given prefix
    fn count_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Physically remove elapsed entries, returning the count removed
    fn sweep_expired(&self) -> Result<usize, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Sled-backed expiring key-value store
#[derive(Clone)]
pub struct SledKvStore {
    tree: sled::Tree,
}

impl SledKvStore {
    /// Open the key-value tree inside an existing sled database
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("kv")?;
        Ok(Self { tree })
    }
}

impl KvStore for SledKvStore {
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let entry = KvEntry {
            value,
            expires_at: ttl.map(|d| Utc::now() + d),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.tree.insert(key, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        match self.tree.get(key)? {
            Some(bytes) => {
                let entry: KvEntry = serde_json::from_slice(&bytes)?;
                if entry.is_expired(Utc::now()) {
                    Ok(None)
                } else {
                    Ok(Some(entry.value))
                }
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let existed = self.tree.remove(key)?.is_some();
        self.tree.flush()?;
        Ok(existed)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut keys = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }

        for key in &keys {
            self.tree.remove(key)?;
        }
        if !keys.is_empty() {
            self.tree.flush()?;
            debug!(prefix = prefix, removed = keys.len(), "Deleted keys by prefix");
        }
        Ok(keys.len())
    }

    fn count_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut count = 0;
        for item in self.tree.scan_prefix(prefix) {
            let (_, bytes) = item?;
            if let Ok(entry) = serde_json::from_slice::<KvEntry>(&bytes) {
                if !entry.is_expired(now) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn sweep_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut expired_keys = Vec::new();

        for item in self.tree.iter() {
            let (key, bytes) = item?;
            match serde_json::from_slice::<KvEntry>(&bytes) {
                Ok(entry) if entry.is_expired(now) => expired_keys.push(key.to_vec()),
                Ok(_) => {}
                // Corrupted entries are removed along with expired ones
                Err(_) => expired_keys.push(key.to_vec()),
            }
        }

        for key in &expired_keys {
            self.tree.remove(key)?;
        }
        if !expired_keys.is_empty() {
            self.tree.flush()?;
        }

        Ok(expired_keys.len())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

/// In-memory expiring key-value store for tests
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        entries.insert(
            key.to_string(),
            KvEntry {
                value,
                expires_at: ttl.map(|d| Utc::now() + d),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(Utc::now()))
            .map(|e| e.value.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(entries.remove(key).is_some())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn count_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        let now = Utc::now();
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .count())
    }

    fn sweep_expired(&self) -> Result<usize, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

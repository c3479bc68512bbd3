//! Persistent key-value storage with in-memory fallback
//!
//! The identity store and the leaderboard share this narrow contract. Writes
//! are durable and last-write-wins; there is no transaction or rollback.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::error::PipelineError;

/// Narrow key-value contract.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PipelineError>;
    fn remove(&self, key: &str) -> Result<(), PipelineError>;
}

/// sled-backed durable store.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| PipelineError::Storage(format!("cannot open store: {e}")))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let value = self
            .db
            .get(key)
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PipelineError> {
        self.db
            .insert(key, value)
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PipelineError> {
        self.db
            .remove(key)
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Process-local fallback used when the durable store cannot be opened.
/// Data lives for the lifetime of the process only; callers must not assume
/// persistence.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Vec<u8>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PipelineError> {
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PipelineError> {
        self.map.remove(key);
        Ok(())
    }
}

/// Open the durable store, falling back to process-local memory so the
/// session keeps working when the disk is unavailable.
pub fn open_store(path: &str) -> Arc<dyn KeyValueStore> {
    match SledStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(
                path = %path,
                error = %err,
                "durable store unavailable, falling back to in-memory storage"
            );
            Arc::new(MemoryStore::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sled_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);
        store.set("key", b"value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"value".to_vec()));
        store.remove("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.set("key", b"durable").unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"durable".to_vec()));
    }

    #[test]
    fn sled_store_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set("key", b"first").unwrap();
        store.set("key", b"second").unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::default();
        store.set("key", b"value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"value".to_vec()));
        store.remove("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn open_store_falls_back_to_memory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A plain file is not a valid sled directory; the fallback store
        // must still accept writes.
        let store = open_store(file.path().to_str().unwrap());
        store.set("key", b"value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some(b"value".to_vec()));
    }
}

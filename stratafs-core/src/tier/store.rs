use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Port consumed by the tier router for warm and cold payloads.
///
/// Implementations must be keyed by opaque blob-id strings and treat stored
/// bytes as immutable; overwrite semantics are never required because blob
/// mutation is modeled as write-new-then-swap at the catalog level.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Root directory for one cacache-backed tier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StoreRoot(PathBuf);

impl StoreRoot {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for StoreRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreRoot").field(&self.0).finish()
    }
}

/// A thin typed wrapper over `cacache` used for the warm and cold tiers.
#[derive(Clone, Debug)]
pub struct CacacheStore {
    root: StoreRoot,
}

impl CacacheStore {
    pub fn new(root: StoreRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &StoreRoot {
        &self.root
    }

    fn map_read_error(key: &str, err: cacache::Error) -> Result<Option<Vec<u8>>, StoreError> {
        match err {
            cacache::Error::EntryNotFound(_, _) => Ok(None),
            cacache::Error::IntegrityError(err) => Err(StoreError::Integrity(format!(
                "entry {key} failed integrity check: {err}"
            ))),
            cacache::Error::SizeMismatch(wanted, actual) => Err(StoreError::Integrity(format!(
                "entry {key} size mismatch: wanted={wanted}, actual={actual}"
            ))),
            cacache::Error::IoError(_, msg) => {
                Err(StoreError::Io(format!("cacache read I/O error: {msg}")))
            }
            cacache::Error::SerdeError(_, msg) => {
                Err(StoreError::Io(format!("cacache read serde error: {msg}")))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for CacacheStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        cacache::write(self.root.as_path(), key, bytes)
            .await
            .map(|_integrity| ())
            .map_err(|e| StoreError::Io(format!("cacache write failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match cacache::read(self.root.as_path(), key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) => Self::map_read_error(key, err),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        cacache::remove(self.root.as_path(), key)
            .await
            .map_err(|e| StoreError::Io(format!("cacache remove failed: {e}")))
    }
}

/// In-memory store used by unit tests and ephemeral catalogs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::new();
        store.put("k1", b"payload").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"payload".to_vec()));
        store.delete("k1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cacache_store_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacacheStore::new(StoreRoot::new(tmp.path().to_path_buf()));
        store.put("blob-1", b"warm bytes").await.unwrap();
        assert_eq!(
            store.get("blob-1").await.unwrap(),
            Some(b"warm bytes".to_vec())
        );
        assert_eq!(store.get("blob-2").await.unwrap(), None);
        store.delete("blob-1").await.unwrap();
        assert_eq!(store.get("blob-1").await.unwrap(), None);
    }
}

//! Size-tiered blob placement.
//!
//! Hot payloads are inlined in the catalog row; warm and cold payloads live
//! in object stores keyed by blob id. Placement is decided per write, and a
//! blob never spans tiers: migration writes a new blob and the catalog swaps
//! `blob_id`/`tier` atomically with the inode row.

mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratafs_model::{BlobId, BlobTier, FsError, FsResult};

use crate::error::StoreError;

pub use store::{CacacheStore, MemoryStore, ObjectStore, StoreRoot};

/// Default inline-payload ceiling: 1 MiB.
pub const DEFAULT_HOT_MAX_SIZE: u64 = 1024 * 1024;
/// Default per-file ceiling: 1 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Size thresholds for tier placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    /// Payloads at or below this size are inlined in the catalog (hot tier).
    pub hot_max_size: u64,
    /// Writes above this size fail with `EFBIG`.
    pub max_file_size: u64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            hot_max_size: DEFAULT_HOT_MAX_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Decides payload placement and moves bytes to and from the object stores.
#[derive(Debug, Clone)]
pub struct TierRouter {
    limits: TierLimits,
    warm: Option<Arc<dyn ObjectStore>>,
    cold: Option<Arc<dyn ObjectStore>>,
}

impl TierRouter {
    pub fn new(
        limits: TierLimits,
        warm: Option<Arc<dyn ObjectStore>>,
        cold: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self { limits, warm, cold }
    }

    /// Router with in-memory warm and cold stores, for tests and ephemeral
    /// catalogs.
    pub fn in_memory(limits: TierLimits) -> Self {
        Self::new(
            limits,
            Some(Arc::new(MemoryStore::new())),
            Some(Arc::new(MemoryStore::new())),
        )
    }

    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    /// Catalog-unique, opaque blob id for a new payload.
    pub fn new_blob_id(&self) -> BlobId {
        BlobId::new()
    }

    /// Placement decision for a payload of `len` bytes destined for `path`.
    ///
    /// Zero-length payloads are not stored at all ([`BlobTier::None`]).
    pub fn place(&self, len: u64, path: &str) -> FsResult<BlobTier> {
        if len > self.limits.max_file_size {
            return Err(FsError::file_too_big(path));
        }
        if len == 0 {
            return Ok(BlobTier::None);
        }
        if len <= self.limits.hot_max_size {
            return Ok(BlobTier::Hot);
        }
        if self.warm.is_some() {
            return Ok(BlobTier::Warm);
        }
        if self.cold.is_some() {
            return Ok(BlobTier::Cold);
        }
        Err(FsError::io(format!(
            "no blob tier available for {len} byte payload"
        )))
    }

    fn store_for(&self, tier: BlobTier) -> Result<&Arc<dyn ObjectStore>, StoreError> {
        let store = match tier {
            BlobTier::Warm => self.warm.as_ref(),
            BlobTier::Cold => self.cold.as_ref(),
            BlobTier::Hot | BlobTier::None => None,
        };
        store.ok_or(StoreError::TierUnavailable(tier))
    }

    /// Persist an out-of-row payload. Hot payloads never reach here; the
    /// catalog inlines them.
    pub async fn store(
        &self,
        tier: BlobTier,
        id: BlobId,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        self.store_for(tier)?.put(&id.storage_key(), bytes).await
    }

    /// Fetch an out-of-row payload from the tier recorded on the inode.
    pub async fn fetch(&self, tier: BlobTier, id: BlobId) -> Result<Vec<u8>, StoreError> {
        let bytes = self.store_for(tier)?.get(&id.storage_key()).await?;
        bytes.ok_or(StoreError::MissingBlob(id, tier))
    }

    /// Remove an out-of-row payload whose last reference is gone.
    pub async fn delete(&self, tier: BlobTier, id: BlobId) -> Result<(), StoreError> {
        self.store_for(tier)?.delete(&id.storage_key()).await
    }
}

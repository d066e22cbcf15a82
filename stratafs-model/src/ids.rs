use uuid::Uuid;

/// Catalog-unique inode id. Maps to the `inodes` table rowid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InodeId(pub i64);

impl InodeId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for InodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque blob id used as the object-store key for warm and cold tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlobId(pub Uuid);

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobId {
    pub fn new() -> Self {
        BlobId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key under which warm/cold payloads are stored.
    pub fn storage_key(&self) -> String {
        self.0.to_string()
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id handed back to a watch subscriber; used for close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatchId(pub Uuid);

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchId {
    pub fn new() -> Self {
        WatchId(Uuid::now_v7())
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

use crate::ids::BlobId;

/// Physical location class for a blob's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BlobTier {
    /// Bytes inlined in the catalog row.
    Hot,
    /// Bytes in the warm object store, keyed by blob id.
    Warm,
    /// Bytes in the cold archive store, keyed by blob id.
    Cold,
    /// No payload (empty file, directory, or symlink).
    #[default]
    None,
}

impl BlobTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobTier::Hot => "hot",
            BlobTier::Warm => "warm",
            BlobTier::Cold => "cold",
            BlobTier::None => "none",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "hot" => Some(BlobTier::Hot),
            "warm" => Some(BlobTier::Warm),
            "cold" => Some(BlobTier::Cold),
            "none" => Some(BlobTier::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlobTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog row describing one immutable byte container.
///
/// `ref_count` equals the number of inodes whose `blob_id` references this
/// blob; the blob is deleted from its tier when the count reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlobRecord {
    pub id: BlobId,
    pub size: u64,
    pub tier: BlobTier,
    pub ref_count: u32,
    /// Millisecond timestamp.
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_tags_round_trip() {
        for tier in [BlobTier::Hot, BlobTier::Warm, BlobTier::Cold, BlobTier::None] {
            assert_eq!(BlobTier::from_str_tag(tier.as_str()), Some(tier));
        }
    }
}

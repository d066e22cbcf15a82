//! Core data model definitions shared across stratafs crates.

pub mod blob;
pub mod error;
pub mod events;
pub mod ids;
pub mod inode;
pub mod mode;
pub mod policy;

// Intentionally curated re-exports for downstream consumers.
pub use blob::{BlobRecord, BlobTier};
pub use error::{FsError, FsErrorKind, Result as FsResult};
pub use events::{FsEvent, FsEventKind};
pub use ids::{BlobId, InodeId, WatchId};
pub use inode::{
    DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DEFAULT_SYMLINK_MODE, DirEntry, Inode,
    InodeKind,
};
pub use mode::{F_OK, R_OK, W_OK, X_OK, mode_string, owner_bits_allow};
pub use policy::{
    ExecutionRecord, OverrideAction, PolicyOverride, RiskLevel, SafetyPolicy,
};

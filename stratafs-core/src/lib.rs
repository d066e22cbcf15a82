//! stratafs-core: a virtual POSIX-like filesystem for single-writer,
//! per-tenant storage runtimes.
//!
//! The crate is organized around five subsystems:
//!
//! - [`catalog`] — the transactional inode/blob store over embedded SQLite,
//!   plus the safety-policy and sparse-preset side tables;
//! - [`tier`] — size-tiered blob placement across inline (hot) and
//!   object-store (warm/cold) storage;
//! - [`fs`] — the user-visible facade: POSIX-style operations, handles,
//!   streams, and event emission;
//! - [`sparse`] — pattern/cone sparse-checkout matching and the filtered
//!   filesystem view;
//! - [`watch`] — per-path debounced change notification;
//! - [`shell`] — the restricted command executor that dispatches file
//!   operations straight to the facade.

pub mod catalog;
pub mod error;
pub mod fs;
pub mod path;
pub mod shell;
pub mod sparse;
pub mod tier;
pub mod watch;

mod time;

pub use stratafs_model as model;

pub use catalog::{Catalog, CatalogOptions, MetadataUpdate, PolicyStore, PresetStore};
pub use fs::{
    FileHandle, FsLimits, MkdirOptions, OpenOptions, ReadStreamOptions, RmOptions,
    StrataFs, WriteFlag, WriteOptions, WriteStream,
};
pub use model::{
    BlobId, BlobRecord, BlobTier, DirEntry, FsError, FsErrorKind, FsEvent,
    FsEventKind, FsResult, Inode, InodeId, InodeKind, WatchId,
};
pub use shell::{ExecConfig, ExecOutcome, ShellExecutor};
pub use sparse::{PresetRegistry, SparseFs, SparseMatcher};
pub use tier::{CacacheStore, MemoryStore, ObjectStore, StoreRoot, TierLimits, TierRouter};
pub use watch::{DebounceMode, WatchConfig, WatchEvent, WatchListener, WatchManager};

//! The POSIX-like filesystem surface.
//!
//! `StrataFs` composes the catalog, the tier router (owned by the catalog),
//! and the watch manager. It adds what the catalog deliberately lacks:
//! symlink traversal, permission checks, payload encodings, and event
//! emission after every successful mutation.

mod handle;
mod stream;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stratafs_model::{
    DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DirEntry, FsError, FsErrorKind, FsEventKind,
    FsResult, Inode, WatchId, F_OK, X_OK, owner_bits_allow,
};

use crate::catalog::{Catalog, CatalogOptions, MetadataUpdate};
use crate::path;
use crate::tier::{TierLimits, TierRouter};
use crate::watch::{WatchConfig, WatchListener, WatchManager};

pub use handle::{FileHandle, OpenOptions};
pub use stream::{ReadStreamOptions, WriteStream};

/// Bound on chained symlink resolutions before giving up.
const MAX_SYMLINK_DEPTH: usize = 40;

/// Facade-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    /// Canonical paths longer than this fail with `ENAMETOOLONG`.
    pub max_path_length: usize,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_path_length: path::DEFAULT_MAX_PATH_LENGTH,
        }
    }
}

/// Write-disposition flag for [`StrataFs::write_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFlag {
    /// Create or replace.
    #[default]
    Overwrite,
    /// Create or extend (`flag = 'a'`).
    Append,
    /// Exclusive create (`flag = 'wx'`): fail `EEXIST` when present.
    Exclusive,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub flag: WriteFlag,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
    pub recursive: bool,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RmOptions {
    pub recursive: bool,
    /// Silently accept missing paths.
    pub force: bool,
}

#[derive(Debug)]
struct FsInner {
    catalog: Catalog,
    watches: WatchManager,
    limits: FsLimits,
}

/// The user-visible filesystem.
#[derive(Debug, Clone)]
pub struct StrataFs {
    inner: Arc<FsInner>,
}

impl StrataFs {
    pub fn new(catalog: Catalog, watches: WatchManager, limits: FsLimits) -> Self {
        Self {
            inner: Arc::new(FsInner {
                catalog,
                watches,
                limits,
            }),
        }
    }

    /// Fully in-memory instance (SQLite memory catalog, memory object
    /// stores, default watch config). The workhorse for tests.
    pub async fn open_in_memory() -> FsResult<Self> {
        let catalog = Catalog::open_in_memory(TierRouter::in_memory(TierLimits::default())).await?;
        let watches = WatchManager::new(WatchConfig::default())?;
        Ok(Self::new(catalog, watches, FsLimits::default()))
    }

    /// Same as [`StrataFs::open_in_memory`] but with explicit tier limits.
    pub async fn open_in_memory_with(limits: TierLimits) -> FsResult<Self> {
        let catalog = Catalog::open_in_memory(TierRouter::in_memory(limits)).await?;
        let watches = WatchManager::new(WatchConfig::default())?;
        Ok(Self::new(catalog, watches, FsLimits::default()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn watches(&self) -> &WatchManager {
        &self.inner.watches
    }

    pub fn limits(&self) -> &FsLimits {
        &self.inner.limits
    }

    fn owner(&self) -> &CatalogOptions {
        self.inner.catalog.options()
    }

    fn normalize(&self, raw: &str) -> FsResult<String> {
        path::normalize(raw, self.inner.limits.max_path_length)
    }

    pub(crate) fn emit(&self, kind: FsEventKind, path: &str) {
        self.inner.watches.emit(kind, path);
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Walk `raw` segment by segment, resolving intermediate symlinks (and
    /// the terminal one when `follow_terminal`). Returns the final canonical
    /// path and, when it exists, its inode. Missing intermediate components
    /// fail with `ENOENT`; a missing final component yields `None`.
    async fn walk(&self, raw: &str, follow_terminal: bool) -> FsResult<(String, Option<Inode>)> {
        let normalized = self.normalize(raw)?;
        if normalized == "/" {
            let root = self.inner.catalog.resolve_required("/").await?;
            return Ok((normalized, Some(root)));
        }

        let mut segments: Vec<String> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        segments.reverse();

        let mut current = String::from("/");
        let mut depth = 0usize;
        while let Some(segment) = segments.pop() {
            let candidate = path::join(&current, &segment);
            let is_last = segments.is_empty();
            match self.inner.catalog.resolve(&candidate).await? {
                None => {
                    if is_last {
                        return Ok((candidate, None));
                    }
                    return Err(FsError::not_found(&candidate));
                }
                Some(inode) if inode.is_symlink() && (!is_last || follow_terminal) => {
                    depth += 1;
                    if depth > MAX_SYMLINK_DEPTH {
                        return Err(FsError::invalid_argument(format!(
                            "too many levels of symbolic links: {normalized}"
                        )));
                    }
                    let target = inode.link_target.as_deref().unwrap_or_default();
                    let resolved = if target.starts_with('/') {
                        self.normalize(target)?
                    } else {
                        self.normalize(&path::join(&current, target))?
                    };
                    // Re-seed the walk with the link target's segments.
                    for seg in resolved.split('/').filter(|s| !s.is_empty()).rev() {
                        segments.push(seg.to_string());
                    }
                    current = String::from("/");
                }
                Some(inode) => {
                    if !is_last && !inode.is_dir() {
                        return Err(FsError::not_directory(&candidate));
                    }
                    if is_last {
                        return Ok((candidate, Some(inode)));
                    }
                    current = candidate;
                }
            }
        }

        let root = self.inner.catalog.resolve_required("/").await?;
        Ok(("/".to_string(), Some(root)))
    }

    async fn walk_required(&self, raw: &str, follow_terminal: bool) -> FsResult<(String, Inode)> {
        let (resolved, inode) = self.walk(raw, follow_terminal).await?;
        match inode {
            Some(inode) => Ok((resolved, inode)),
            None => Err(FsError::not_found(resolved)),
        }
    }

    /// `stat`: follows symlinks terminally.
    pub async fn stat(&self, raw: &str) -> FsResult<Inode> {
        Ok(self.walk_required(raw, true).await?.1)
    }

    /// `lstat`: returns the symlink inode itself.
    pub async fn lstat(&self, raw: &str) -> FsResult<Inode> {
        Ok(self.walk_required(raw, false).await?.1)
    }

    /// Fully resolved canonical path; `ENOENT` when any segment is missing.
    pub async fn realpath(&self, raw: &str) -> FsResult<String> {
        Ok(self.walk_required(raw, true).await?.0)
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub async fn read_file(&self, raw: &str) -> FsResult<Vec<u8>> {
        let (_, inode) = self.walk_required(raw, true).await?;
        if inode.is_dir() {
            return Err(FsError::is_directory(&inode.path));
        }
        let payload = self.inner.catalog.read_payload(&inode).await?;
        self.inner.catalog.touch_atime(inode.id).await?;
        Ok(payload)
    }

    /// UTF-8 decoded contents; invalid UTF-8 fails with `EINVAL`.
    pub async fn read_to_string(&self, raw: &str) -> FsResult<String> {
        let bytes = self.read_file(raw).await?;
        String::from_utf8(bytes)
            .map_err(|_| FsError::invalid_argument(format!("not valid UTF-8: {raw}")))
    }

    /// Base64 of the raw stored bytes.
    pub async fn read_file_base64(&self, raw: &str) -> FsResult<String> {
        Ok(BASE64.encode(self.read_file(raw).await?))
    }

    pub async fn read_dir(&self, raw: &str) -> FsResult<Vec<String>> {
        Ok(self
            .read_dir_entries(raw)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    pub async fn read_dir_entries(&self, raw: &str) -> FsResult<Vec<DirEntry>> {
        let (_, inode) = self.walk_required(raw, true).await?;
        if !inode.is_dir() {
            return Err(FsError::not_directory(&inode.path));
        }
        let children = self.inner.catalog.list_children(inode.id).await?;
        Ok(children
            .into_iter()
            .map(|c| DirEntry {
                name: c.name,
                kind: c.kind,
            })
            .collect())
    }

    /// Every path below the directory, relative to it, ordered by path.
    pub async fn read_dir_recursive(&self, raw: &str) -> FsResult<Vec<String>> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        if !inode.is_dir() {
            return Err(FsError::not_directory(&inode.path));
        }
        let subtree = self.inner.catalog.list_subtree(&resolved).await?;
        Ok(subtree
            .into_iter()
            .map(|i| path::relative_to_root(&i.path, &resolved).to_string())
            .collect())
    }

    pub async fn read_link(&self, raw: &str) -> FsResult<String> {
        let (_, inode) = self.walk_required(raw, false).await?;
        match inode.link_target {
            Some(target) if inode.is_symlink() => Ok(target),
            _ => Err(FsError::invalid_argument(format!(
                "not a symbolic link: {}",
                inode.path
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub async fn write_file(&self, raw: &str, data: &[u8], opts: WriteOptions) -> FsResult<()> {
        let (resolved, existing) = self.walk(raw, true).await?;
        match existing {
            Some(inode) => {
                if inode.is_dir() {
                    return Err(FsError::is_directory(&resolved));
                }
                if opts.flag == WriteFlag::Exclusive {
                    return Err(FsError::exists(&resolved));
                }
                self.inner
                    .catalog
                    .write_payload(inode.id, data, opts.flag == WriteFlag::Append)
                    .await?;
                self.emit(FsEventKind::Change, &resolved);
            }
            None => {
                // Validate placement up front so an oversized payload does
                // not leave an empty inode behind.
                self.inner
                    .catalog
                    .router()
                    .place(data.len() as u64, &resolved)?;
                let owner = self.owner().clone();
                let inode = self
                    .inner
                    .catalog
                    .create_regular(
                        &resolved,
                        opts.mode.unwrap_or(DEFAULT_FILE_MODE),
                        owner.owner_uid,
                        owner.owner_gid,
                    )
                    .await?;
                if !data.is_empty() {
                    self.inner.catalog.write_payload(inode.id, data, false).await?;
                }
                self.emit(FsEventKind::Create, &resolved);
            }
        }
        Ok(())
    }

    pub async fn append_file(&self, raw: &str, data: &[u8]) -> FsResult<()> {
        self.write_file(
            raw,
            data,
            WriteOptions {
                flag: WriteFlag::Append,
                ..WriteOptions::default()
            },
        )
        .await
    }

    pub async fn truncate(&self, raw: &str, len: u64) -> FsResult<()> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        if inode.is_dir() {
            return Err(FsError::is_directory(&resolved));
        }
        let mut payload = self.inner.catalog.read_payload(&inode).await?;
        payload.resize(len as usize, 0);
        self.inner.catalog.write_payload(inode.id, &payload, false).await?;
        self.emit(FsEventKind::Change, &resolved);
        Ok(())
    }

    pub async fn unlink(&self, raw: &str) -> FsResult<()> {
        let (resolved, _) = self.walk_required(raw, false).await?;
        self.inner.catalog.remove_file(&resolved).await?;
        self.emit(FsEventKind::Delete, &resolved);
        Ok(())
    }

    pub async fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let old = self.normalize(old)?;
        let new = self.normalize(new)?;
        self.inner.catalog.rename(&old, &new).await?;
        self.emit(FsEventKind::Rename, &old);
        self.emit(FsEventKind::Rename, &new);
        Ok(())
    }

    /// Copy one regular file. With `exclusive`, an existing destination
    /// fails `EEXIST`. The source is never modified.
    pub async fn copy_file(&self, src: &str, dest: &str, exclusive: bool) -> FsResult<()> {
        let (_, src_inode) = self.walk_required(src, true).await?;
        if src_inode.is_dir() {
            return Err(FsError::is_directory(&src_inode.path));
        }
        let payload = self.inner.catalog.read_payload(&src_inode).await?;
        let flag = if exclusive {
            WriteFlag::Exclusive
        } else {
            WriteFlag::Overwrite
        };
        self.write_file(
            dest,
            &payload,
            WriteOptions {
                mode: Some(src_inode.mode),
                flag,
            },
        )
        .await
    }

    pub async fn mkdir(&self, raw: &str, opts: MkdirOptions) -> FsResult<()> {
        let normalized = self.normalize(raw)?;
        let owner = self.owner().clone();
        self.inner
            .catalog
            .create_directory(
                &normalized,
                opts.mode.unwrap_or(DEFAULT_DIR_MODE),
                owner.owner_uid,
                owner.owner_gid,
                opts.recursive,
            )
            .await?;
        self.emit(FsEventKind::Create, &normalized);
        Ok(())
    }

    pub async fn rmdir(&self, raw: &str, recursive: bool) -> FsResult<()> {
        let (resolved, _) = self.walk_required(raw, false).await?;
        self.inner.catalog.remove_directory(&resolved, recursive).await?;
        self.emit(FsEventKind::Delete, &resolved);
        Ok(())
    }

    /// Remove a file, symlink, or (with `recursive`) a whole subtree.
    pub async fn rm(&self, raw: &str, opts: RmOptions) -> FsResult<()> {
        let normalized = self.normalize(raw)?;
        let inode = match self.inner.catalog.resolve(&normalized).await? {
            Some(inode) => inode,
            None => {
                if opts.force {
                    debug!("rm --force on missing path {normalized}");
                    return Ok(());
                }
                return Err(FsError::not_found(&normalized));
            }
        };

        if inode.is_dir() {
            if !opts.recursive {
                return Err(FsError::is_directory(&normalized));
            }
            self.inner.catalog.remove_directory(&normalized, true).await?;
        } else {
            self.inner.catalog.remove_file(&normalized).await?;
        }
        self.emit(FsEventKind::Delete, &normalized);
        Ok(())
    }

    pub async fn symlink(&self, target: &str, raw: &str) -> FsResult<()> {
        let normalized = self.normalize(raw)?;
        let owner = self.owner().clone();
        self.inner
            .catalog
            .create_symlink(&normalized, target, owner.owner_uid, owner.owner_gid)
            .await?;
        self.emit(FsEventKind::Create, &normalized);
        Ok(())
    }

    pub async fn link(&self, existing: &str, new: &str) -> FsResult<()> {
        let (src, _) = self.walk_required(existing, false).await?;
        let new = self.normalize(new)?;
        self.inner.catalog.create_hard_link(&src, &new).await?;
        self.emit(FsEventKind::Create, &new);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub async fn chmod(&self, raw: &str, mode: u32) -> FsResult<()> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        self.inner
            .catalog
            .update_metadata_by_id(
                inode.id,
                MetadataUpdate {
                    mode: Some(mode & 0o7777),
                    ..MetadataUpdate::default()
                },
            )
            .await?;
        self.emit(FsEventKind::Change, &resolved);
        Ok(())
    }

    pub async fn chown(&self, raw: &str, uid: u32, gid: u32) -> FsResult<()> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        self.inner
            .catalog
            .update_metadata_by_id(
                inode.id,
                MetadataUpdate {
                    uid: Some(uid),
                    gid: Some(gid),
                    ..MetadataUpdate::default()
                },
            )
            .await?;
        self.emit(FsEventKind::Change, &resolved);
        Ok(())
    }

    pub async fn utimes(&self, raw: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        self.inner
            .catalog
            .update_metadata_by_id(
                inode.id,
                MetadataUpdate {
                    atime: Some(atime_ms),
                    mtime: Some(mtime_ms),
                    ..MetadataUpdate::default()
                },
            )
            .await?;
        self.emit(FsEventKind::Change, &resolved);
        Ok(())
    }

    /// POSIX `access(2)` against the owner permission bits. `F_OK` tests
    /// existence only; other masks also require the X bit on every ancestor
    /// directory.
    pub async fn access(&self, raw: &str, mask: u32) -> FsResult<()> {
        let (resolved, inode) = self.walk_required(raw, true).await?;
        if mask == F_OK {
            return Ok(());
        }
        for ancestor in path::ancestors(&resolved) {
            let dir = self.inner.catalog.resolve_required(&ancestor).await?;
            if !owner_bits_allow(dir.mode, X_OK) {
                return Err(FsError::permission_denied(&ancestor));
            }
        }
        if !owner_bits_allow(inode.mode, mask) {
            return Err(FsError::permission_denied(&resolved));
        }
        Ok(())
    }

    pub async fn exists(&self, raw: &str) -> FsResult<bool> {
        match self.access(raw, F_OK).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == FsErrorKind::Io => Err(err),
            Err(_) => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Handles, streams, watches
    // ------------------------------------------------------------------

    pub async fn open(&self, raw: &str, opts: OpenOptions) -> FsResult<FileHandle> {
        handle::open(self.clone(), raw, opts).await
    }

    pub fn write_stream(&self, raw: &str) -> WriteStream {
        stream::write_stream(self.clone(), raw)
    }

    pub fn read_stream(
        &self,
        raw: &str,
        opts: ReadStreamOptions,
    ) -> impl futures::Stream<Item = FsResult<Vec<u8>>> + Send + 'static {
        stream::read_stream(self.clone(), raw.to_string(), opts)
    }

    /// Subscribe to change events at `path` (and below with `recursive`).
    pub fn watch(&self, raw: &str, recursive: bool, listener: WatchListener) -> FsResult<WatchId> {
        let normalized = self.normalize(raw)?;
        Ok(self.inner.watches.watch(&normalized, recursive, listener))
    }

    pub fn unwatch(&self, id: WatchId) {
        self.inner.watches.close(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::{BlobTier, FsErrorKind, InodeKind};

    async fn fs() -> StrataFs {
        StrataFs::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fs = fs().await;
        fs.write_file("/a.txt", b"hello", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"hello");
        assert_eq!(fs.read_to_string("/a.txt").await.unwrap(), "hello");
        assert_eq!(fs.read_file_base64("/a.txt").await.unwrap(), "aGVsbG8=");

        let stat = fs.stat("/a.txt").await.unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.tier, BlobTier::Hot);
    }

    #[tokio::test]
    async fn exclusive_write_fails_on_existing() {
        let fs = fs().await;
        fs.write_file("/f", b"1", WriteOptions::default()).await.unwrap();
        let err = fs
            .write_file(
                "/f",
                b"2",
                WriteOptions {
                    flag: WriteFlag::Exclusive,
                    ..WriteOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exists);
    }

    #[tokio::test]
    async fn append_creates_then_extends() {
        let fs = fs().await;
        fs.append_file("/log", b"one").await.unwrap();
        fs.append_file("/log", b",two").await.unwrap();
        assert_eq!(fs.read_to_string("/log").await.unwrap(), "one,two");
    }

    #[tokio::test]
    async fn reading_a_directory_fails_eisdir() {
        let fs = fs().await;
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        let err = fs.read_file("/d").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::IsDirectory);
    }

    #[tokio::test]
    async fn rename_moves_contents_and_clears_source() {
        let fs = fs().await;
        fs.write_file("/a", b"A", WriteOptions::default()).await.unwrap();
        fs.write_file("/b", b"B", WriteOptions::default()).await.unwrap();
        fs.rename("/a", "/b").await.unwrap();
        assert_eq!(fs.read_to_string("/b").await.unwrap(), "A");
        assert!(!fs.exists("/a").await.unwrap());
    }

    #[tokio::test]
    async fn rm_force_swallows_missing_paths() {
        let fs = fs().await;
        fs.rm("/missing", RmOptions { force: true, recursive: false })
            .await
            .unwrap();
        let err = fs
            .rm("/missing", RmOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rm_recursive_clears_subtrees() {
        let fs = fs().await;
        fs.mkdir("/x/y/z", MkdirOptions { recursive: true, mode: None })
            .await
            .unwrap();
        fs.write_file("/x/y/z/f", b"1", WriteOptions::default())
            .await
            .unwrap();
        fs.rm("/x", RmOptions { recursive: true, force: true })
            .await
            .unwrap();
        assert!(!fs.exists("/x").await.unwrap());
        assert!(!fs.exists("/x/y/z/f").await.unwrap());
    }

    #[tokio::test]
    async fn symlinks_resolve_transparently() {
        let fs = fs().await;
        fs.mkdir("/real", MkdirOptions::default()).await.unwrap();
        fs.write_file("/real/f.txt", b"data", WriteOptions::default())
            .await
            .unwrap();
        fs.symlink("/real", "/alias").await.unwrap();

        assert_eq!(fs.read_file("/alias/f.txt").await.unwrap(), b"data");
        assert_eq!(fs.realpath("/alias/f.txt").await.unwrap(), "/real/f.txt");

        let l = fs.lstat("/alias").await.unwrap();
        assert_eq!(l.kind, InodeKind::Symlink);
        let s = fs.stat("/alias").await.unwrap();
        assert_eq!(s.kind, InodeKind::Directory);
        assert_eq!(fs.read_link("/alias").await.unwrap(), "/real");
    }

    #[tokio::test]
    async fn relative_symlink_targets_resolve_against_their_directory() {
        let fs = fs().await;
        fs.mkdir("/a/b", MkdirOptions { recursive: true, mode: None })
            .await
            .unwrap();
        fs.write_file("/a/target.txt", b"T", WriteOptions::default())
            .await
            .unwrap();
        fs.symlink("../target.txt", "/a/b/link").await.unwrap();
        assert_eq!(fs.read_to_string("/a/b/link").await.unwrap(), "T");
    }

    #[tokio::test]
    async fn symlink_cycles_are_detected() {
        let fs = fs().await;
        fs.symlink("/loop-b", "/loop-a").await.unwrap();
        fs.symlink("/loop-a", "/loop-b").await.unwrap();
        let err = fs.read_file("/loop-a").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn readlink_on_regular_file_is_einval() {
        let fs = fs().await;
        fs.write_file("/f", b"x", WriteOptions::default()).await.unwrap();
        let err = fs.read_link("/f").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn truncate_pads_and_shrinks() {
        let fs = fs().await;
        fs.write_file("/t", b"abcdef", WriteOptions::default())
            .await
            .unwrap();
        fs.truncate("/t", 3).await.unwrap();
        assert_eq!(fs.read_file("/t").await.unwrap(), b"abc");
        fs.truncate("/t", 5).await.unwrap();
        assert_eq!(fs.read_file("/t").await.unwrap(), b"abc\0\0");
    }

    #[tokio::test]
    async fn access_checks_owner_bits() {
        let fs = fs().await;
        fs.write_file("/locked", b"x", WriteOptions::default())
            .await
            .unwrap();
        fs.chmod("/locked", 0o400).await.unwrap();

        fs.access("/locked", stratafs_model::R_OK).await.unwrap();
        let err = fs
            .access("/locked", stratafs_model::W_OK)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
        // F_OK ignores permission bits entirely.
        fs.access("/locked", F_OK).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_requires_execute_on_ancestors() {
        let fs = fs().await;
        fs.mkdir("/closed", MkdirOptions::default()).await.unwrap();
        fs.write_file("/closed/f", b"x", WriteOptions::default())
            .await
            .unwrap();
        fs.chmod("/closed", 0o600).await.unwrap();
        let err = fs.access("/closed/f", stratafs_model::R_OK).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn copy_file_leaves_source_untouched() {
        let fs = fs().await;
        fs.write_file("/src", b"payload", WriteOptions::default())
            .await
            .unwrap();
        fs.copy_file("/src", "/dst", false).await.unwrap();
        assert_eq!(fs.read_file("/dst").await.unwrap(), b"payload");
        assert_eq!(fs.read_file("/src").await.unwrap(), b"payload");

        let err = fs.copy_file("/src", "/dst", true).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exists);
    }

    #[tokio::test]
    async fn readdir_reflects_parent_relation() {
        let fs = fs().await;
        fs.mkdir("/d/sub", MkdirOptions { recursive: true, mode: None })
            .await
            .unwrap();
        fs.write_file("/d/file", b"x", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(fs.read_dir("/d").await.unwrap(), vec!["file", "sub"]);
        let entries = fs.read_dir_entries("/d").await.unwrap();
        assert_eq!(entries[0].kind, InodeKind::File);
        assert_eq!(entries[1].kind, InodeKind::Directory);

        let err = fs.read_dir("/d/file").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotDirectory);
    }

    #[tokio::test]
    async fn recursive_readdir_lists_relative_paths() {
        let fs = fs().await;
        fs.mkdir("/r/a/b", MkdirOptions { recursive: true, mode: None })
            .await
            .unwrap();
        fs.write_file("/r/a/b/f", b"x", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            fs.read_dir_recursive("/r").await.unwrap(),
            vec!["a", "a/b", "a/b/f"]
        );
    }

    #[tokio::test]
    async fn utimes_sets_explicit_timestamps() {
        let fs = fs().await;
        fs.write_file("/t", b"x", WriteOptions::default()).await.unwrap();
        fs.utimes("/t", 1_000, 2_000).await.unwrap();
        let stat = fs.stat("/t").await.unwrap();
        assert_eq!(stat.atime, 1_000);
        assert_eq!(stat.mtime, 2_000);
    }
}

//! Transactional inode and blob catalog over embedded SQLite.
//!
//! The catalog is the single shared mutable structure of a runtime instance
//! and assumes a single-writer context: the pool is capped at one connection
//! and every mutation runs in one transaction. Lookup is lexical; symlink
//! traversal is the facade's concern.

mod policies;
mod presets;

use std::str::FromStr;

use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use stratafs_model::{
    BlobId, BlobTier, FsError, FsResult, Inode, InodeId, InodeKind,
    DEFAULT_DIR_MODE, DEFAULT_SYMLINK_MODE,
};

use crate::path;
use crate::tier::TierRouter;
use crate::time::now_ms;

pub use policies::PolicyStore;
pub use presets::{PresetRecord, PresetStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS inodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES inodes(id),
        kind TEXT NOT NULL,
        mode INTEGER NOT NULL,
        uid INTEGER NOT NULL,
        gid INTEGER NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        link_target TEXT,
        blob_id TEXT,
        tier TEXT NOT NULL DEFAULT 'none',
        nlink INTEGER NOT NULL DEFAULT 1,
        atime INTEGER NOT NULL,
        mtime INTEGER NOT NULL,
        ctime INTEGER NOT NULL,
        birthtime INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_inodes_parent ON inodes(parent_id)",
    "CREATE TABLE IF NOT EXISTS blobs (
        id TEXT PRIMARY KEY,
        data BLOB,
        size INTEGER NOT NULL,
        tier TEXT NOT NULL,
        ref_count INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sparse_presets (
        name TEXT PRIMARY KEY,
        include TEXT NOT NULL,
        exclude TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS safety_policies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        allowlist_mode INTEGER NOT NULL DEFAULT 0,
        blocked TEXT NOT NULL,
        allowed TEXT NOT NULL,
        dangerous_patterns TEXT NOT NULL,
        strict INTEGER NOT NULL DEFAULT 0,
        timeout_ms INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS safety_overrides (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        command TEXT NOT NULL,
        is_pattern INTEGER NOT NULL DEFAULT 0,
        action TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        expires_at INTEGER,
        active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS execution_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        command_text TEXT NOT NULL,
        exit_code INTEGER NOT NULL,
        was_blocked INTEGER NOT NULL DEFAULT 0,
        block_reason TEXT,
        cwd TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        executed_at INTEGER NOT NULL
    )",
];

/// Construction options: configured owner/group for new inodes.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub owner_uid: u32,
    pub owner_gid: u32,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            owner_uid: 1000,
            owner_gid: 1000,
        }
    }
}

/// Partial metadata update; `None` fields are left untouched. `ctime` is
/// always refreshed.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
}

/// Blob payloads whose last reference went away inside a transaction; the
/// object-store delete happens after commit, best effort.
type OrphanedBlobs = Vec<(BlobTier, BlobId)>;

#[derive(Clone, Debug)]
pub struct Catalog {
    pool: SqlitePool,
    router: TierRouter,
    options: CatalogOptions,
}

impl Catalog {
    /// Open (creating if missing) a catalog at the given SQLite URL and
    /// initialize the schema and root directory.
    pub async fn open(
        url: &str,
        router: TierRouter,
        options: CatalogOptions,
    ) -> FsResult<Self> {
        let connect = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .map_err(|e| FsError::io(format!("invalid catalog url: {e}")))?
            .create_if_missing(true);

        // Single-writer model: one connection, kept alive for the pool's
        // lifetime so in-memory databases survive idle periods.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await
            .map_err(|e| FsError::io(format!("catalog connection failed: {e}")))?;

        let catalog = Self {
            pool,
            router,
            options,
        };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    /// Ephemeral catalog for tests and scratch runtimes.
    pub async fn open_in_memory(router: TierRouter) -> FsResult<Self> {
        Self::open("sqlite::memory:", router, CatalogOptions::default()).await
    }

    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    pub fn options(&self) -> &CatalogOptions {
        &self.options
    }

    /// Repository for safety policies, overrides, and execution history.
    pub fn policies(&self) -> PolicyStore {
        PolicyStore::new(self.pool.clone())
    }

    /// Repository for persisted sparse presets.
    pub fn presets(&self) -> PresetStore {
        PresetStore::new(self.pool.clone())
    }

    async fn init_schema(&self) -> FsResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        let now = now_ms();
        sqlx::query(
            "INSERT INTO inodes (path, name, parent_id, kind, mode, uid, gid,
                                 size, tier, nlink, atime, mtime, ctime, birthtime)
             SELECT '/', '', NULL, 'directory', ?, ?, ?, 0, 'none', 1, ?, ?, ?, ?
             WHERE NOT EXISTS (SELECT 1 FROM inodes WHERE path = '/')",
        )
        .bind(DEFAULT_DIR_MODE as i64)
        .bind(self.options.owner_uid as i64)
        .bind(self.options.owner_gid as i64)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!("catalog schema initialized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Lexical lookup by canonical path.
    pub async fn resolve(&self, path: &str) -> FsResult<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_inode).transpose()
    }

    /// Lookup failing with `ENOENT` on a missing path.
    pub async fn resolve_required(&self, path: &str) -> FsResult<Inode> {
        self.resolve(path)
            .await?
            .ok_or_else(|| FsError::not_found(path))
    }

    pub async fn resolve_by_id(&self, id: InodeId) -> FsResult<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_inode).transpose()
    }

    /// Children of a directory inode, ordered by name.
    pub async fn list_children(&self, id: InodeId) -> FsResult<Vec<Inode>> {
        let rows = sqlx::query("SELECT * FROM inodes WHERE parent_id = ? ORDER BY name")
            .bind(id.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(hydrate_inode).collect()
    }

    /// Every inode strictly below `dir_path`, ordered by path.
    pub async fn list_subtree(&self, dir_path: &str) -> FsResult<Vec<Inode>> {
        let rows = sqlx::query(
            "SELECT * FROM inodes WHERE path LIKE ? ESCAPE '\\' ORDER BY path",
        )
        .bind(like_child_pattern(dir_path))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(hydrate_inode).collect()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create an empty regular file. `EEXIST` on an occupied path, `ENOENT`
    /// on a missing parent, `ENOTDIR` when the parent is not a directory.
    pub async fn create_regular(
        &self,
        path: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> FsResult<Inode> {
        let mut tx = self.begin().await?;
        let inode = self
            .insert_entry_tx(&mut tx, path, InodeKind::File, mode, uid, gid, None)
            .await?;
        self.commit(tx).await?;
        Ok(inode)
    }

    /// Create a directory. With `recursive`, missing ancestors are created
    /// idempotently and an existing directory is returned as-is.
    pub async fn create_directory(
        &self,
        path: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        recursive: bool,
    ) -> FsResult<Inode> {
        let mut tx = self.begin().await?;

        if let Some(existing) = self.resolve_tx(&mut tx, path).await? {
            if recursive && existing.is_dir() {
                self.commit(tx).await?;
                return Ok(existing);
            }
            return Err(FsError::exists(path));
        }

        if recursive {
            let mut missing = vec![path.to_string()];
            for ancestor in path::ancestors(path) {
                match self.resolve_tx(&mut tx, &ancestor).await? {
                    Some(inode) if inode.is_dir() => break,
                    Some(_) => return Err(FsError::not_directory(&ancestor)),
                    None => missing.push(ancestor),
                }
            }
            let mut created = None;
            for dir in missing.into_iter().rev() {
                created = Some(
                    self.insert_entry_tx(
                        &mut tx,
                        &dir,
                        InodeKind::Directory,
                        mode,
                        uid,
                        gid,
                        None,
                    )
                    .await?,
                );
            }
            self.commit(tx).await?;
            return Ok(created.expect("at least the target directory was created"));
        }

        let inode = self
            .insert_entry_tx(&mut tx, path, InodeKind::Directory, mode, uid, gid, None)
            .await?;
        self.commit(tx).await?;
        Ok(inode)
    }

    /// Create a symbolic link; the target string is stored verbatim.
    pub async fn create_symlink(
        &self,
        path: &str,
        target: &str,
        uid: u32,
        gid: u32,
    ) -> FsResult<Inode> {
        let mut tx = self.begin().await?;
        let inode = self
            .insert_entry_tx(
                &mut tx,
                path,
                InodeKind::Symlink,
                DEFAULT_SYMLINK_MODE,
                uid,
                gid,
                Some(target),
            )
            .await?;
        self.commit(tx).await?;
        Ok(inode)
    }

    /// Create a hard-link alias sharing the source's blob.
    pub async fn create_hard_link(&self, existing: &str, new: &str) -> FsResult<Inode> {
        let mut tx = self.begin().await?;

        let src = self
            .resolve_tx(&mut tx, existing)
            .await?
            .ok_or_else(|| FsError::not_found(existing))?;
        if src.is_dir() {
            return Err(FsError::invalid_argument(format!(
                "hard link to directory: {existing}"
            )));
        }
        if self.resolve_tx(&mut tx, new).await?.is_some() {
            return Err(FsError::exists(new));
        }
        let parent = self.require_parent_dir_tx(&mut tx, new).await?;

        let now = now_ms();
        let name = path::basename(new);
        sqlx::query(
            "INSERT INTO inodes (path, name, parent_id, kind, mode, uid, gid, size,
                                 link_target, blob_id, tier, nlink,
                                 atime, mtime, ctime, birthtime)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new)
        .bind(name)
        .bind(parent.id.as_i64())
        .bind(src.kind.as_str())
        .bind(src.mode as i64)
        .bind(src.uid as i64)
        .bind(src.gid as i64)
        .bind(src.size as i64)
        .bind(src.link_target.as_deref())
        .bind(src.blob_id.map(|b| b.storage_key()))
        .bind(src.tier.as_str())
        .bind(src.nlink as i64 + 1)
        .bind(src.atime)
        .bind(src.mtime)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(blob_id) = src.blob_id {
            sqlx::query("UPDATE blobs SET ref_count = ref_count + 1 WHERE id = ?")
                .bind(blob_id.storage_key())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            // Keep nlink consistent across every alias of the blob.
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM inodes WHERE blob_id = ?")
                    .bind(blob_id.storage_key())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            sqlx::query("UPDATE inodes SET nlink = ?, ctime = ? WHERE blob_id = ?")
                .bind(count)
                .bind(now)
                .bind(blob_id.storage_key())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        } else {
            sqlx::query("UPDATE inodes SET nlink = nlink + 1, ctime = ? WHERE id = ?")
                .bind(now)
                .bind(src.id.as_i64())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let created = self
            .resolve_tx(&mut tx, new)
            .await?
            .ok_or_else(|| FsError::io("hard link row vanished mid-transaction"))?;
        self.commit(tx).await?;
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Rename
    // ------------------------------------------------------------------

    /// Atomically move the inode (and its subtree) at `old` to `new`,
    /// replacing any existing target. Identity rename is a no-op that
    /// preserves the source inode.
    pub async fn rename(&self, old: &str, new: &str) -> FsResult<Inode> {
        if old == new {
            return self.resolve_required(old).await;
        }
        if path::is_within(new, old) {
            return Err(FsError::invalid_argument(format!(
                "cannot move {old} inside itself"
            )));
        }

        let mut tx = self.begin().await?;
        let src = self
            .resolve_tx(&mut tx, old)
            .await?
            .ok_or_else(|| FsError::not_found(old))?;

        let mut orphaned = OrphanedBlobs::new();
        if let Some(target) = self.resolve_tx(&mut tx, new).await? {
            if target.is_dir() {
                if !src.is_dir() {
                    return Err(FsError::is_directory(new));
                }
                if self.count_children_tx(&mut tx, target.id).await? > 0 {
                    return Err(FsError::not_empty(new));
                }
            } else if src.is_dir() {
                return Err(FsError::not_directory(new));
            }
            self.delete_row_tx(&mut tx, &target, &mut orphaned).await?;
        }

        let parent = self.require_parent_dir_tx(&mut tx, new).await?;
        let now = now_ms();
        sqlx::query(
            "UPDATE inodes SET path = ?, name = ?, parent_id = ?, ctime = ? WHERE id = ?",
        )
        .bind(new)
        .bind(path::basename(new))
        .bind(parent.id.as_i64())
        .bind(now)
        .bind(src.id.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if src.is_dir() {
            sqlx::query(
                "UPDATE inodes SET path = ? || substr(path, ?)
                 WHERE path LIKE ? ESCAPE '\\'",
            )
            .bind(new)
            .bind(old.len() as i64 + 1)
            .bind(like_child_pattern(old))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let moved = self
            .resolve_tx(&mut tx, new)
            .await?
            .ok_or_else(|| FsError::io("renamed row vanished mid-transaction"))?;
        self.commit(tx).await?;
        self.sweep_orphans(orphaned).await;
        Ok(moved)
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove a non-directory. `ENOENT` when missing, `EISDIR` on a
    /// directory. Returns the removed inode for event emission.
    pub async fn remove_file(&self, path: &str) -> FsResult<Inode> {
        let mut tx = self.begin().await?;
        let inode = self
            .resolve_tx(&mut tx, path)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;
        if inode.is_dir() {
            return Err(FsError::is_directory(path));
        }

        let mut orphaned = OrphanedBlobs::new();
        self.delete_row_tx(&mut tx, &inode, &mut orphaned).await?;
        self.commit(tx).await?;
        self.sweep_orphans(orphaned).await;
        Ok(inode)
    }

    /// Remove a directory. Without `recursive`, a non-empty directory fails
    /// with `ENOTEMPTY`.
    pub async fn remove_directory(&self, path: &str, recursive: bool) -> FsResult<Inode> {
        if path == "/" {
            return Err(FsError::invalid_argument("cannot remove the root directory"));
        }

        let mut tx = self.begin().await?;
        let inode = self
            .resolve_tx(&mut tx, path)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;
        if !inode.is_dir() {
            return Err(FsError::not_directory(path));
        }

        let children = self.count_children_tx(&mut tx, inode.id).await?;
        if children > 0 && !recursive {
            return Err(FsError::not_empty(path));
        }

        let mut orphaned = OrphanedBlobs::new();
        if children > 0 {
            let rows = sqlx::query(
                "SELECT * FROM inodes WHERE path LIKE ? ESCAPE '\\'",
            )
            .bind(like_child_pattern(path))
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
            for row in &rows {
                let descendant = hydrate_inode(row)?;
                self.release_blob_of_tx(&mut tx, &descendant, &mut orphaned)
                    .await?;
            }
            sqlx::query("DELETE FROM inodes WHERE path LIKE ? ESCAPE '\\'")
                .bind(like_child_pattern(path))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        sqlx::query("DELETE FROM inodes WHERE id = ?")
            .bind(inode.id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        self.commit(tx).await?;
        self.sweep_orphans(orphaned).await;
        Ok(inode)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Apply a partial metadata update; refreshes `ctime`.
    pub async fn update_metadata(&self, path: &str, update: MetadataUpdate) -> FsResult<Inode> {
        let inode = self.resolve_required(path).await?;
        self.update_metadata_by_id(inode.id, update).await
    }

    pub async fn update_metadata_by_id(
        &self,
        id: InodeId,
        update: MetadataUpdate,
    ) -> FsResult<Inode> {
        let now = now_ms();
        sqlx::query(
            "UPDATE inodes SET
                mode = COALESCE(?, mode),
                uid = COALESCE(?, uid),
                gid = COALESCE(?, gid),
                atime = COALESCE(?, atime),
                mtime = COALESCE(?, mtime),
                ctime = ?
             WHERE id = ?",
        )
        .bind(update.mode.map(|m| m as i64))
        .bind(update.uid.map(|u| u as i64))
        .bind(update.gid.map(|g| g as i64))
        .bind(update.atime)
        .bind(update.mtime)
        .bind(now)
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.resolve_by_id(id)
            .await?
            .ok_or_else(|| FsError::io("inode vanished during metadata update"))
    }

    /// Refresh `atime` only; used by reads. Does not touch `ctime`.
    pub async fn touch_atime(&self, id: InodeId) -> FsResult<()> {
        sqlx::query("UPDATE inodes SET atime = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payload I/O
    // ------------------------------------------------------------------

    /// Read the full payload of a regular file inode.
    pub async fn read_payload(&self, inode: &Inode) -> FsResult<Vec<u8>> {
        let Some(blob_id) = inode.blob_id else {
            return Ok(Vec::new());
        };
        match inode.tier {
            BlobTier::Hot => {
                let data: Option<Vec<u8>> =
                    sqlx::query_scalar("SELECT data FROM blobs WHERE id = ?")
                        .bind(blob_id.storage_key())
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(db_err)?
                        .flatten();
                data.ok_or_else(|| {
                    FsError::io(format!("hot blob {blob_id} missing from catalog"))
                })
            }
            BlobTier::Warm | BlobTier::Cold => Ok(self
                .router
                .fetch(inode.tier, blob_id)
                .await
                .map_err(FsError::from)?),
            BlobTier::None => Ok(Vec::new()),
        }
    }

    /// Replace (or, with `append`, extend) the payload of the file at `id`.
    ///
    /// Mutation is write-new-then-swap: the replacement blob is fully
    /// persisted before any inode row changes, so a failed object-store
    /// write leaves the catalog untouched. Every alias sharing the old blob
    /// moves to the new one atomically.
    pub async fn write_payload(
        &self,
        id: InodeId,
        data: &[u8],
        append: bool,
    ) -> FsResult<Inode> {
        let inode = self
            .resolve_by_id(id)
            .await?
            .ok_or_else(|| FsError::io(format!("no inode with id {id}")))?;
        if inode.is_dir() {
            return Err(FsError::is_directory(&inode.path));
        }

        let payload = if append && inode.blob_id.is_some() {
            let mut existing = self.read_payload(&inode).await?;
            existing.extend_from_slice(data);
            existing
        } else {
            data.to_vec()
        };

        let tier = self.router.place(payload.len() as u64, &inode.path)?;
        let new_blob = (tier != BlobTier::None).then(|| self.router.new_blob_id());

        // Out-of-row payloads are persisted before the catalog transaction.
        if let Some(blob_id) = new_blob {
            if matches!(tier, BlobTier::Warm | BlobTier::Cold) {
                self.router
                    .store(tier, blob_id, &payload)
                    .await
                    .map_err(FsError::from)?;
            }
        }

        let mut tx = self.begin().await?;
        let now = now_ms();
        let size = payload.len() as i64;

        if let Some(blob_id) = new_blob {
            let alias_count: i64 = match inode.blob_id {
                Some(old) => sqlx::query_scalar("SELECT COUNT(*) FROM inodes WHERE blob_id = ?")
                    .bind(old.storage_key())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?,
                None => 1,
            };
            sqlx::query(
                "INSERT INTO blobs (id, data, size, tier, ref_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(blob_id.storage_key())
            .bind((tier == BlobTier::Hot).then_some(payload.as_slice()))
            .bind(size)
            .bind(tier.as_str())
            .bind(alias_count.max(1))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let new_blob_key = new_blob.map(|b| b.storage_key());
        match inode.blob_id {
            Some(old) => {
                sqlx::query(
                    "UPDATE inodes SET blob_id = ?, size = ?, tier = ?, mtime = ?, ctime = ?
                     WHERE blob_id = ?",
                )
                .bind(new_blob_key.as_deref())
                .bind(size)
                .bind(tier.as_str())
                .bind(now)
                .bind(now)
                .bind(old.storage_key())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query("DELETE FROM blobs WHERE id = ?")
                    .bind(old.storage_key())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            None => {
                sqlx::query(
                    "UPDATE inodes SET blob_id = ?, size = ?, tier = ?, mtime = ?, ctime = ?
                     WHERE id = ?",
                )
                .bind(new_blob_key.as_deref())
                .bind(size)
                .bind(tier.as_str())
                .bind(now)
                .bind(now)
                .bind(id.as_i64())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        self.commit(tx).await?;

        if let Some(old) = inode.blob_id {
            if matches!(inode.tier, BlobTier::Warm | BlobTier::Cold) {
                self.sweep_orphans(vec![(inode.tier, old)]).await;
            }
        }

        self.resolve_by_id(id)
            .await?
            .ok_or_else(|| FsError::io("inode vanished during payload write"))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn begin(&self) -> FsResult<Transaction<'_, Sqlite>> {
        self.pool.begin().await.map_err(db_err)
    }

    async fn commit(&self, tx: Transaction<'_, Sqlite>) -> FsResult<()> {
        tx.commit().await.map_err(db_err)
    }

    async fn resolve_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        path: &str,
    ) -> FsResult<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_inode).transpose()
    }

    async fn count_children_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: InodeId,
    ) -> FsResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM inodes WHERE parent_id = ?")
            .bind(id.as_i64())
            .fetch_one(&mut **tx)
            .await
            .map_err(db_err)
    }

    async fn require_parent_dir_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        path: &str,
    ) -> FsResult<Inode> {
        let parent_path = path::dirname(path);
        let parent = self
            .resolve_tx(tx, parent_path)
            .await?
            .ok_or_else(|| FsError::not_found(parent_path))?;
        if !parent.is_dir() {
            return Err(FsError::not_directory(parent_path));
        }
        Ok(parent)
    }

    async fn insert_entry_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        path: &str,
        kind: InodeKind,
        mode: u32,
        uid: u32,
        gid: u32,
        link_target: Option<&str>,
    ) -> FsResult<Inode> {
        if self.resolve_tx(tx, path).await?.is_some() {
            return Err(FsError::exists(path));
        }
        let parent = self.require_parent_dir_tx(tx, path).await?;

        let now = now_ms();
        // Symlink size mirrors the target string length, POSIX-style.
        let size = link_target.map(|t| t.len() as i64).unwrap_or(0);
        let result = sqlx::query(
            "INSERT INTO inodes (path, name, parent_id, kind, mode, uid, gid, size,
                                 link_target, tier, nlink, atime, mtime, ctime, birthtime)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'none', 1, ?, ?, ?, ?)",
        )
        .bind(path)
        .bind(path::basename(path))
        .bind(parent.id.as_i64())
        .bind(kind.as_str())
        .bind(mode as i64)
        .bind(uid as i64)
        .bind(gid as i64)
        .bind(size)
        .bind(link_target)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        let id = InodeId(result.last_insert_rowid());
        self.resolve_by_id_tx(tx, id)
            .await?
            .ok_or_else(|| FsError::io("inserted inode vanished mid-transaction"))
    }

    async fn resolve_by_id_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: InodeId,
    ) -> FsResult<Option<Inode>> {
        let row = sqlx::query("SELECT * FROM inodes WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_inode).transpose()
    }

    /// Delete one inode row and release its blob reference.
    async fn delete_row_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        inode: &Inode,
        orphaned: &mut OrphanedBlobs,
    ) -> FsResult<()> {
        sqlx::query("DELETE FROM inodes WHERE id = ?")
            .bind(inode.id.as_i64())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        self.release_blob_of_tx(tx, inode, orphaned).await
    }

    async fn release_blob_of_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        inode: &Inode,
        orphaned: &mut OrphanedBlobs,
    ) -> FsResult<()> {
        let Some(blob_id) = inode.blob_id else {
            return Ok(());
        };

        sqlx::query("UPDATE blobs SET ref_count = ref_count - 1 WHERE id = ?")
            .bind(blob_id.storage_key())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        let remaining: Option<i64> =
            sqlx::query_scalar("SELECT ref_count FROM blobs WHERE id = ?")
                .bind(blob_id.storage_key())
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;

        if remaining.unwrap_or(0) <= 0 {
            sqlx::query("DELETE FROM blobs WHERE id = ?")
                .bind(blob_id.storage_key())
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            if matches!(inode.tier, BlobTier::Warm | BlobTier::Cold) {
                orphaned.push((inode.tier, blob_id));
            }
        } else {
            // Remaining aliases lose one link.
            sqlx::query("UPDATE inodes SET nlink = nlink - 1, ctime = ? WHERE blob_id = ?")
                .bind(now_ms())
                .bind(blob_id.storage_key())
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    /// Best-effort object-store cleanup after commit. Failures leave an
    /// unreferenced object behind, never a dangling catalog row.
    async fn sweep_orphans(&self, orphaned: OrphanedBlobs) {
        for (tier, blob_id) in orphaned {
            if let Err(err) = self.router.delete(tier, blob_id).await {
                warn!("orphaned blob {blob_id} not removed from {tier} store: {err}");
            }
        }
    }
}

fn db_err(err: sqlx::Error) -> FsError {
    FsError::io(format!("catalog database: {err}"))
}

/// LIKE pattern matching strict descendants of `dir_path`, with `%`/`_`
/// literals escaped.
fn like_child_pattern(dir_path: &str) -> String {
    let mut escaped = String::with_capacity(dir_path.len() + 2);
    for ch in dir_path.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    if dir_path == "/" {
        "/%".to_string()
    } else {
        format!("{escaped}/%")
    }
}

fn hydrate_inode(row: &SqliteRow) -> FsResult<Inode> {
    let kind_tag: String = row.try_get("kind").map_err(db_err)?;
    let kind = InodeKind::from_str_tag(&kind_tag)
        .ok_or_else(|| FsError::io(format!("corrupt inode kind tag: {kind_tag}")))?;
    let tier_tag: String = row.try_get("tier").map_err(db_err)?;
    let tier = BlobTier::from_str_tag(&tier_tag)
        .ok_or_else(|| FsError::io(format!("corrupt blob tier tag: {tier_tag}")))?;
    let blob_id: Option<String> = row.try_get("blob_id").map_err(db_err)?;
    let blob_id = blob_id
        .map(|raw| {
            raw.parse::<uuid::Uuid>()
                .map(BlobId)
                .map_err(|e| FsError::io(format!("corrupt blob id: {e}")))
        })
        .transpose()?;

    Ok(Inode {
        id: InodeId(row.try_get::<i64, _>("id").map_err(db_err)?),
        path: row.try_get("path").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        parent_id: row
            .try_get::<Option<i64>, _>("parent_id")
            .map_err(db_err)?
            .map(InodeId),
        kind,
        mode: row.try_get::<i64, _>("mode").map_err(db_err)? as u32,
        uid: row.try_get::<i64, _>("uid").map_err(db_err)? as u32,
        gid: row.try_get::<i64, _>("gid").map_err(db_err)? as u32,
        size: row.try_get::<i64, _>("size").map_err(db_err)? as u64,
        link_target: row.try_get("link_target").map_err(db_err)?,
        blob_id,
        tier,
        nlink: row.try_get::<i64, _>("nlink").map_err(db_err)? as u32,
        atime: row.try_get("atime").map_err(db_err)?,
        mtime: row.try_get("mtime").map_err(db_err)?,
        ctime: row.try_get("ctime").map_err(db_err)?,
        birthtime: row.try_get("birthtime").map_err(db_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierLimits;
    use stratafs_model::FsErrorKind;

    async fn catalog() -> Catalog {
        let router = TierRouter::in_memory(TierLimits {
            hot_max_size: 16,
            max_file_size: 1024,
        });
        Catalog::open_in_memory(router).await.unwrap()
    }

    #[tokio::test]
    async fn root_exists_after_init() {
        let catalog = catalog().await;
        let root = catalog.resolve_required("/").await.unwrap();
        assert!(root.is_dir());
        assert_eq!(root.parent_id, None);
        assert_eq!(root.name, "");
    }

    #[tokio::test]
    async fn create_resolves_and_rejects_duplicates() {
        let catalog = catalog().await;
        catalog.create_regular("/a.txt", 0o644, 1000, 1000).await.unwrap();
        let inode = catalog.resolve_required("/a.txt").await.unwrap();
        assert!(inode.is_file());
        assert_eq!(inode.size, 0);
        assert_eq!(inode.tier, BlobTier::None);

        let err = catalog
            .create_regular("/a.txt", 0o644, 1000, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exists);
    }

    #[tokio::test]
    async fn create_requires_directory_parent() {
        let catalog = catalog().await;
        let err = catalog
            .create_regular("/no/such/file", 0o644, 1000, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);

        catalog.create_regular("/plain", 0o644, 1000, 1000).await.unwrap();
        let err = catalog
            .create_regular("/plain/child", 0o644, 1000, 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotDirectory);
    }

    #[tokio::test]
    async fn recursive_mkdir_is_idempotent() {
        let catalog = catalog().await;
        catalog
            .create_directory("/x/y/z", 0o755, 1000, 1000, true)
            .await
            .unwrap();
        catalog
            .create_directory("/x/y/z", 0o755, 1000, 1000, true)
            .await
            .unwrap();
        assert!(catalog.resolve_required("/x/y").await.unwrap().is_dir());

        let err = catalog
            .create_directory("/x/y/z", 0o755, 1000, 1000, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exists);
    }

    #[tokio::test]
    async fn payload_round_trips_across_tiers() {
        let catalog = catalog().await;
        let small = catalog.create_regular("/small", 0o644, 1000, 1000).await.unwrap();
        let updated = catalog.write_payload(small.id, b"hello", false).await.unwrap();
        assert_eq!(updated.tier, BlobTier::Hot);
        assert_eq!(updated.size, 5);
        assert_eq!(catalog.read_payload(&updated).await.unwrap(), b"hello");

        let big = catalog.create_regular("/big", 0o644, 1000, 1000).await.unwrap();
        let payload = vec![7u8; 17];
        let updated = catalog.write_payload(big.id, &payload, false).await.unwrap();
        assert_eq!(updated.tier, BlobTier::Warm);
        assert_eq!(catalog.read_payload(&updated).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn append_concatenates_payloads() {
        let catalog = catalog().await;
        let inode = catalog.create_regular("/log", 0o644, 1000, 1000).await.unwrap();
        catalog.write_payload(inode.id, b"one", false).await.unwrap();
        let updated = catalog.write_payload(inode.id, b" two", true).await.unwrap();
        assert_eq!(catalog.read_payload(&updated).await.unwrap(), b"one two");
    }

    #[tokio::test]
    async fn empty_write_drops_the_blob() {
        let catalog = catalog().await;
        let inode = catalog.create_regular("/f", 0o644, 1000, 1000).await.unwrap();
        catalog.write_payload(inode.id, b"data", false).await.unwrap();
        let updated = catalog.write_payload(inode.id, b"", false).await.unwrap();
        assert_eq!(updated.size, 0);
        assert_eq!(updated.blob_id, None);
        assert_eq!(updated.tier, BlobTier::None);
    }

    #[tokio::test]
    async fn hard_links_share_payload_and_nlink() {
        let catalog = catalog().await;
        let file = catalog.create_regular("/orig", 0o644, 1000, 1000).await.unwrap();
        catalog.write_payload(file.id, b"shared", false).await.unwrap();

        let link = catalog.create_hard_link("/orig", "/alias").await.unwrap();
        let orig = catalog.resolve_required("/orig").await.unwrap();
        assert_eq!(link.blob_id, orig.blob_id);
        assert_eq!(link.nlink, 2);
        assert_eq!(orig.nlink, 2);

        // Writing through one alias is visible through the other.
        catalog.write_payload(orig.id, b"rewritten", false).await.unwrap();
        let alias = catalog.resolve_required("/alias").await.unwrap();
        assert_eq!(catalog.read_payload(&alias).await.unwrap(), b"rewritten");

        // Removing one alias decrements nlink but keeps the payload.
        catalog.remove_file("/orig").await.unwrap();
        let alias = catalog.resolve_required("/alias").await.unwrap();
        assert_eq!(alias.nlink, 1);
        assert_eq!(catalog.read_payload(&alias).await.unwrap(), b"rewritten");
    }

    #[tokio::test]
    async fn hard_link_rejects_directories() {
        let catalog = catalog().await;
        catalog
            .create_directory("/dir", 0o755, 1000, 1000, false)
            .await
            .unwrap();
        let err = catalog.create_hard_link("/dir", "/alias").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn rename_moves_subtrees_and_replaces_target() {
        let catalog = catalog().await;
        catalog
            .create_directory("/src/nested", 0o755, 1000, 1000, true)
            .await
            .unwrap();
        let f = catalog
            .create_regular("/src/nested/f", 0o644, 1000, 1000)
            .await
            .unwrap();
        catalog.write_payload(f.id, b"A", false).await.unwrap();

        catalog.rename("/src", "/dst").await.unwrap();
        assert!(catalog.resolve("/src").await.unwrap().is_none());
        let moved = catalog.resolve_required("/dst/nested/f").await.unwrap();
        assert_eq!(catalog.read_payload(&moved).await.unwrap(), b"A");
        assert_eq!(
            catalog.resolve_required("/dst/nested").await.unwrap().id,
            moved.parent_id.unwrap()
        );
    }

    #[tokio::test]
    async fn rename_is_identity_on_same_path() {
        let catalog = catalog().await;
        let before = catalog.create_regular("/same", 0o644, 1000, 1000).await.unwrap();
        let after = catalog.rename("/same", "/same").await.unwrap();
        assert_eq!(before.id, after.id);
        assert!(catalog.resolve("/same").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rename_refuses_moving_a_directory_into_itself() {
        let catalog = catalog().await;
        catalog
            .create_directory("/a/b", 0o755, 1000, 1000, true)
            .await
            .unwrap();
        let err = catalog.rename("/a", "/a/b/c").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn remove_directory_honors_not_empty() {
        let catalog = catalog().await;
        catalog
            .create_directory("/d", 0o755, 1000, 1000, false)
            .await
            .unwrap();
        catalog.create_regular("/d/f", 0o644, 1000, 1000).await.unwrap();

        let err = catalog.remove_directory("/d", false).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotEmpty);

        catalog.remove_directory("/d", true).await.unwrap();
        assert!(catalog.resolve("/d").await.unwrap().is_none());
        assert!(catalog.resolve("/d/f").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_file_rejects_directories() {
        let catalog = catalog().await;
        catalog
            .create_directory("/d", 0o755, 1000, 1000, false)
            .await
            .unwrap();
        let err = catalog.remove_file("/d").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::IsDirectory);
    }

    #[tokio::test]
    async fn metadata_update_refreshes_ctime() {
        let catalog = catalog().await;
        let inode = catalog.create_regular("/m", 0o644, 1000, 1000).await.unwrap();
        let updated = catalog
            .update_metadata(
                "/m",
                MetadataUpdate {
                    mode: Some(0o600),
                    ..MetadataUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.mode, 0o600);
        assert!(updated.ctime >= inode.ctime);
        assert_eq!(updated.birthtime, inode.birthtime);
    }

    #[tokio::test]
    async fn readdir_matches_parent_relation() {
        let catalog = catalog().await;
        catalog
            .create_directory("/d", 0o755, 1000, 1000, false)
            .await
            .unwrap();
        catalog.create_regular("/d/b", 0o644, 1000, 1000).await.unwrap();
        catalog.create_regular("/d/a", 0o644, 1000, 1000).await.unwrap();
        catalog.create_regular("/top", 0o644, 1000, 1000).await.unwrap();

        let dir = catalog.resolve_required("/d").await.unwrap();
        let names: Vec<String> = catalog
            .list_children(dir.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn symlink_stores_target_verbatim() {
        let catalog = catalog().await;
        let link = catalog
            .create_symlink("/l", "../relative/../target", 1000, 1000)
            .await
            .unwrap();
        assert!(link.is_symlink());
        assert_eq!(link.link_target.as_deref(), Some("../relative/../target"));
        assert_eq!(link.size as usize, "../relative/../target".len());
    }
}

//! Positioned file handles.
//!
//! A handle addresses its inode by id, so writes through one path remain
//! visible through every alias of the same inode, including after renames.
//! Handles do not pin unlinked inodes: once the last catalog row is gone,
//! further handle operations fail with `ENOENT`.

use stratafs_model::{FsError, FsEventKind, FsResult, Inode, InodeId, DEFAULT_FILE_MODE};

use crate::fs::StrataFs;

/// Open disposition, modeled after the classic open(2) flag set.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    /// Create the file when missing.
    pub create: bool,
    /// Fail `EEXIST` when the file already exists.
    pub create_new: bool,
    /// Truncate existing contents on open.
    pub truncate: bool,
    pub mode: Option<u32>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            create_new: false,
            truncate: false,
            mode: None,
        }
    }
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn read_write() -> Self {
        Self {
            write: true,
            create: true,
            ..Self::default()
        }
    }

    pub fn append_only() -> Self {
        Self {
            read: false,
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }
}

/// An open file with a position cursor.
#[derive(Debug)]
pub struct FileHandle {
    fs: StrataFs,
    id: InodeId,
    readable: bool,
    writable: bool,
    append: bool,
    offset: u64,
    closed: bool,
}

pub(super) async fn open(fs: StrataFs, raw: &str, opts: OpenOptions) -> FsResult<FileHandle> {
    let (resolved, existing) = fs.walk(raw, true).await?;
    let inode = match existing {
        Some(inode) => {
            if inode.is_dir() {
                return Err(FsError::is_directory(&resolved));
            }
            if opts.create_new {
                return Err(FsError::exists(&resolved));
            }
            if opts.truncate && inode.size > 0 {
                let updated = fs.catalog().write_payload(inode.id, b"", false).await?;
                fs.emit(FsEventKind::Change, &resolved);
                updated
            } else {
                inode
            }
        }
        None => {
            if !(opts.create || opts.create_new) {
                return Err(FsError::not_found(&resolved));
            }
            let owner = fs.catalog().options().clone();
            let inode = fs
                .catalog()
                .create_regular(
                    &resolved,
                    opts.mode.unwrap_or(DEFAULT_FILE_MODE),
                    owner.owner_uid,
                    owner.owner_gid,
                )
                .await?;
            fs.emit(FsEventKind::Create, &resolved);
            inode
        }
    };

    let offset = if opts.append { inode.size } else { 0 };
    Ok(FileHandle {
        fs,
        id: inode.id,
        readable: opts.read,
        writable: opts.write || opts.append,
        append: opts.append,
        offset,
        closed: false,
    })
}

impl FileHandle {
    fn ensure_open(&self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::invalid_argument("file handle already closed"));
        }
        Ok(())
    }

    async fn inode(&self) -> FsResult<Inode> {
        self.fs
            .catalog()
            .resolve_by_id(self.id)
            .await?
            .ok_or_else(|| FsError::not_found("<unlinked inode>"))
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub async fn stat(&self) -> FsResult<Inode> {
        self.ensure_open()?;
        self.inode().await
    }

    /// Read up to `max_len` bytes at the cursor, advancing it.
    pub async fn read(&mut self, max_len: usize) -> FsResult<Vec<u8>> {
        let chunk = self.read_at(self.offset, max_len).await?;
        self.offset += chunk.len() as u64;
        Ok(chunk)
    }

    /// Positioned read; does not move the cursor.
    pub async fn read_at(&self, offset: u64, max_len: usize) -> FsResult<Vec<u8>> {
        self.ensure_open()?;
        if !self.readable {
            return Err(FsError::invalid_argument("handle not opened for reading"));
        }
        let inode = self.inode().await?;
        let payload = self.fs.catalog().read_payload(&inode).await?;
        let start = (offset as usize).min(payload.len());
        let end = start.saturating_add(max_len).min(payload.len());
        self.fs.catalog().touch_atime(self.id).await?;
        Ok(payload[start..end].to_vec())
    }

    /// Write at the cursor, advancing it. In append mode the cursor is
    /// pinned to end-of-file first.
    pub async fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        if self.append {
            self.offset = self.inode().await?.size;
        }
        let written = self.write_at(self.offset, data).await?;
        self.offset += written as u64;
        Ok(written)
    }

    /// Positioned write; zero-fills any gap between end-of-file and
    /// `offset`. Does not move the cursor.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.writable {
            return Err(FsError::invalid_argument("handle not opened for writing"));
        }
        let inode = self.inode().await?;
        let mut payload = self.fs.catalog().read_payload(&inode).await?;
        let offset = offset as usize;
        if payload.len() < offset {
            payload.resize(offset, 0);
        }
        let end = offset + data.len();
        if payload.len() < end {
            payload.resize(end, 0);
        }
        payload[offset..end].copy_from_slice(data);
        let updated = self.fs.catalog().write_payload(self.id, &payload, false).await?;
        self.fs.emit(FsEventKind::Change, &updated.path);
        Ok(data.len())
    }

    pub async fn truncate(&self, len: u64) -> FsResult<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(FsError::invalid_argument("handle not opened for writing"));
        }
        let inode = self.inode().await?;
        let mut payload = self.fs.catalog().read_payload(&inode).await?;
        payload.resize(len as usize, 0);
        let updated = self.fs.catalog().write_payload(self.id, &payload, false).await?;
        self.fs.emit(FsEventKind::Change, &updated.path);
        Ok(())
    }

    /// Durability is provided by the transactional catalog; sync is a
    /// compatibility no-op.
    pub async fn sync(&self) -> FsResult<()> {
        self.ensure_open()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

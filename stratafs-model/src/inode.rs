use crate::blob::BlobTier;
use crate::ids::{BlobId, InodeId};

/// Default permission bits for newly created regular files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default permission bits for newly created directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Default permission bits for symbolic links.
pub const DEFAULT_SYMLINK_MODE: u32 = 0o777;

/// Kind tag for catalog entries. Immutable after creation.
///
/// Hard-link aliases are `File` inodes that share the target's blob id; they
/// are not a distinct kind on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InodeKind {
    File,
    Directory,
    Symlink,
}

impl InodeKind {
    pub fn is_file(&self) -> bool {
        matches!(self, InodeKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, InodeKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, InodeKind::Symlink)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InodeKind::File => "file",
            InodeKind::Directory => "directory",
            InodeKind::Symlink => "symlink",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "file" => Some(InodeKind::File),
            "directory" => Some(InodeKind::Directory),
            "symlink" => Some(InodeKind::Symlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for InodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry: the unit of filesystem metadata.
///
/// Invariants enforced by the catalog:
/// - `path` is canonical and unique among live inodes;
/// - `parent_id` is `None` iff this is the root directory;
/// - `blob_id` is `Some` iff the inode is a regular file with payload bytes;
/// - `tier` is [`BlobTier::None`] iff `blob_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Inode {
    pub id: InodeId,
    pub path: String,
    pub name: String,
    pub parent_id: Option<InodeId>,
    pub kind: InodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub link_target: Option<String>,
    pub blob_id: Option<BlobId>,
    pub tier: BlobTier,
    pub nlink: u32,
    /// Millisecond timestamps.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl Inode {
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Entry returned by `readdir` with `with_file_types`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirEntry {
    pub name: String,
    pub kind: InodeKind,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates_are_exclusive() {
        assert!(InodeKind::File.is_file());
        assert!(!InodeKind::File.is_dir());
        assert!(InodeKind::Directory.is_dir());
        assert!(InodeKind::Symlink.is_symlink());
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [InodeKind::File, InodeKind::Directory, InodeKind::Symlink] {
            assert_eq!(InodeKind::from_str_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(InodeKind::from_str_tag("socket"), None);
    }
}

//! Sparse-filtered view over the FS facade.
//!
//! Read operations on paths outside the sparse view fail `ENOENT`, so the
//! filtered filesystem is indistinguishable from a smaller one. Directory
//! listings are filtered entry by entry; writes pass through unchanged.

use stratafs_model::{DirEntry, FsError, FsResult, Inode};

use crate::fs::{MkdirOptions, RmOptions, StrataFs, WriteOptions};
use crate::path;
use crate::sparse::matcher::SparseMatcher;

/// A `StrataFs` decorated with a [`SparseMatcher`].
#[derive(Debug, Clone)]
pub struct SparseFs {
    fs: StrataFs,
    matcher: SparseMatcher,
}

impl SparseFs {
    pub fn new(fs: StrataFs, matcher: SparseMatcher) -> Self {
        Self { fs, matcher }
    }

    pub fn matcher(&self) -> &SparseMatcher {
        &self.matcher
    }

    pub fn inner(&self) -> &StrataFs {
        &self.fs
    }

    /// Visible iff included, or (for directories) still traversable.
    fn visible(&self, path: &str, is_dir: bool) -> bool {
        if path == "/" {
            return true;
        }
        self.matcher.should_include(path)
            || (is_dir && self.matcher.should_traverse_directory(path))
    }

    fn require_file_visible(&self, path: &str) -> FsResult<()> {
        if self.matcher.should_include(path) {
            Ok(())
        } else {
            Err(FsError::not_found(path))
        }
    }

    // ------------------------------------------------------------------
    // Filtered reads
    // ------------------------------------------------------------------

    pub async fn read_file(&self, raw: &str) -> FsResult<Vec<u8>> {
        self.require_file_visible(raw)?;
        self.fs.read_file(raw).await
    }

    pub async fn read_to_string(&self, raw: &str) -> FsResult<String> {
        self.require_file_visible(raw)?;
        self.fs.read_to_string(raw).await
    }

    pub async fn stat(&self, raw: &str) -> FsResult<Inode> {
        let inode = self.fs.stat(raw).await?;
        if self.visible(&inode.path, inode.is_dir()) {
            Ok(inode)
        } else {
            Err(FsError::not_found(raw))
        }
    }

    pub async fn lstat(&self, raw: &str) -> FsResult<Inode> {
        let inode = self.fs.lstat(raw).await?;
        if self.visible(&inode.path, inode.is_dir()) {
            Ok(inode)
        } else {
            Err(FsError::not_found(raw))
        }
    }

    pub async fn exists(&self, raw: &str) -> FsResult<bool> {
        match self.stat(raw).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == stratafs_model::FsErrorKind::Io => Err(err),
            Err(_) => Ok(false),
        }
    }

    pub async fn access(&self, raw: &str, mask: u32) -> FsResult<()> {
        // Run the visibility check first so a filtered path reads as absent
        // rather than forbidden.
        self.stat(raw).await?;
        self.fs.access(raw, mask).await
    }

    pub async fn read_link(&self, raw: &str) -> FsResult<String> {
        self.lstat(raw).await?;
        self.fs.read_link(raw).await
    }

    /// Filtered listing: files must be included, subdirectories must at
    /// least be traversable.
    pub async fn read_dir(&self, raw: &str) -> FsResult<Vec<String>> {
        Ok(self
            .read_dir_entries(raw)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    pub async fn read_dir_entries(&self, raw: &str) -> FsResult<Vec<DirEntry>> {
        let dir = self.fs.stat(raw).await?;
        if dir.is_dir() && !self.visible(&dir.path, true) {
            return Err(FsError::not_found(raw));
        }
        let entries = self.fs.read_dir_entries(raw).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                let child = path::join(&dir.path, &entry.name);
                self.visible(&child, entry.is_dir())
            })
            .collect())
    }

    /// Recursive walk honoring traversal pruning.
    pub async fn read_dir_recursive(&self, raw: &str) -> FsResult<Vec<String>> {
        let dir = self.fs.stat(raw).await?;
        if dir.is_dir() && !self.visible(&dir.path, true) {
            return Err(FsError::not_found(raw));
        }

        let mut out = Vec::new();
        let mut stack = vec![dir.path.clone()];
        while let Some(current) = stack.pop() {
            for entry in self.fs.read_dir_entries(&current).await? {
                let child = path::join(&current, &entry.name);
                if entry.is_dir() {
                    if self.matcher.should_traverse_directory(&child)
                        || self.matcher.should_include(&child)
                    {
                        out.push(child.clone());
                        stack.push(child);
                    }
                } else if self.matcher.should_include(&child) {
                    out.push(child);
                }
            }
        }
        out.sort();
        Ok(out
            .into_iter()
            .map(|p| path::relative_to_root(&p, &dir.path).to_string())
            .collect())
    }

    // ------------------------------------------------------------------
    // Pass-through writes
    // ------------------------------------------------------------------

    pub async fn write_file(&self, raw: &str, data: &[u8], opts: WriteOptions) -> FsResult<()> {
        self.fs.write_file(raw, data, opts).await
    }

    pub async fn mkdir(&self, raw: &str, opts: MkdirOptions) -> FsResult<()> {
        self.fs.mkdir(raw, opts).await
    }

    pub async fn rm(&self, raw: &str, opts: RmOptions) -> FsResult<()> {
        self.fs.rm(raw, opts).await
    }

    pub async fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        self.fs.rename(old, new).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::FsErrorKind;

    async fn project_fs() -> StrataFs {
        let fs = StrataFs::open_in_memory().await.unwrap();
        for dir in ["/src", "/lib", "/node_modules/x"] {
            fs.mkdir(dir, MkdirOptions { recursive: true, mode: None })
                .await
                .unwrap();
        }
        fs.write_file("/src/i.ts", b"ts", WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/lib/i.js", b"js", WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/node_modules/x/i.js", b"dep", WriteOptions::default())
            .await
            .unwrap();
        fs
    }

    async fn sparse(include: &[&str]) -> SparseFs {
        let fs = project_fs().await;
        let matcher =
            SparseMatcher::patterns(include.iter().copied(), [] as [&str; 0]).unwrap();
        SparseFs::new(fs, matcher)
    }

    #[tokio::test]
    async fn excluded_files_read_as_missing() {
        let view = sparse(&["src/**"]).await;

        assert_eq!(view.read_file("/src/i.ts").await.unwrap(), b"ts");
        let err = view.read_file("/lib/i.js").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);
        let err = view.stat("/lib/i.js").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);
        assert!(!view.exists("/lib/i.js").await.unwrap());
    }

    #[tokio::test]
    async fn root_listing_is_filtered() {
        let view = sparse(&["src/**"]).await;
        assert_eq!(view.read_dir("/").await.unwrap(), vec!["src"]);
    }

    #[tokio::test]
    async fn recursive_listing_prunes_untraversable_directories() {
        let view = sparse(&["src/**"]).await;
        assert_eq!(
            view.read_dir_recursive("/").await.unwrap(),
            vec!["src", "src/i.ts"]
        );
    }

    #[tokio::test]
    async fn writes_pass_through_and_remain_filtered_on_read() {
        let view = sparse(&["src/**"]).await;
        view.write_file("/lib/new.js", b"x", WriteOptions::default())
            .await
            .unwrap();
        // The write landed in the underlying fs but stays invisible here.
        assert_eq!(view.inner().read_file("/lib/new.js").await.unwrap(), b"x");
        assert!(!view.exists("/lib/new.js").await.unwrap());
    }

    #[tokio::test]
    async fn missing_paths_still_read_as_missing() {
        let view = sparse(&["src/**"]).await;
        let err = view.read_file("/src/absent.ts").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);
    }
}

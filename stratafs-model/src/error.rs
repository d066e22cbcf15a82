use std::fmt::{self, Display};

/// Error kinds surfaced to callers of the catalog and FS facade.
///
/// These are the only codes the core emits externally; everything else
/// (object-store failures, database errors) collapses into [`FsErrorKind::Io`]
/// with a descriptive message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FsErrorKind {
    /// The path, or an intermediate component, does not exist.
    NotFound,
    /// The target already exists and the operation requires absence.
    Exists,
    /// The operation requires a non-directory but found a directory.
    IsDirectory,
    /// The operation requires a directory but found otherwise.
    NotDirectory,
    /// Directory removal without `recursive` on a non-empty directory.
    NotEmpty,
    /// Malformed argument (readlink on a non-symlink, wildcard in cone mode).
    InvalidArgument,
    /// Permission check failure.
    PermissionDenied,
    /// File exceeds the configured maximum size.
    FileTooBig,
    /// Path exceeds the configured maximum length.
    NameTooLong,
    /// Generic I/O failure in storage below the catalog.
    Io,
}

impl FsErrorKind {
    /// POSIX-style code name used on the wire and in messages.
    pub fn code(&self) -> &'static str {
        match self {
            FsErrorKind::NotFound => "ENOENT",
            FsErrorKind::Exists => "EEXIST",
            FsErrorKind::IsDirectory => "EISDIR",
            FsErrorKind::NotDirectory => "ENOTDIR",
            FsErrorKind::NotEmpty => "ENOTEMPTY",
            FsErrorKind::InvalidArgument => "EINVAL",
            FsErrorKind::PermissionDenied => "EACCES",
            FsErrorKind::FileTooBig => "EFBIG",
            FsErrorKind::NameTooLong => "ENAMETOOLONG",
            FsErrorKind::Io => "EIO",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            FsErrorKind::NotFound => "no such file or directory",
            FsErrorKind::Exists => "file exists",
            FsErrorKind::IsDirectory => "is a directory",
            FsErrorKind::NotDirectory => "not a directory",
            FsErrorKind::NotEmpty => "directory not empty",
            FsErrorKind::InvalidArgument => "invalid argument",
            FsErrorKind::PermissionDenied => "permission denied",
            FsErrorKind::FileTooBig => "file too large",
            FsErrorKind::NameTooLong => "file name too long",
            FsErrorKind::Io => "input/output error",
        }
    }
}

impl Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A typed filesystem failure with the failing path attached when relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsError {
    kind: FsErrorKind,
    path: Option<String>,
    message: Option<String>,
}

impl FsError {
    pub fn new(kind: FsErrorKind) -> Self {
        Self { kind, path: None, message: None }
    }

    pub fn with_path(kind: FsErrorKind, path: impl AsRef<str>) -> Self {
        Self { kind, path: Some(path.as_ref().to_string()), message: None }
    }

    pub fn with_message(kind: FsErrorKind, message: impl AsRef<str>) -> Self {
        Self { kind, path: None, message: Some(message.as_ref().to_string()) }
    }

    pub fn kind(&self) -> FsErrorKind {
        self.kind
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn not_found(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::NotFound, path)
    }

    pub fn exists(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::Exists, path)
    }

    pub fn is_directory(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::IsDirectory, path)
    }

    pub fn not_directory(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::NotDirectory, path)
    }

    pub fn not_empty(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::NotEmpty, path)
    }

    pub fn invalid_argument(message: impl AsRef<str>) -> Self {
        Self::with_message(FsErrorKind::InvalidArgument, message)
    }

    pub fn permission_denied(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::PermissionDenied, path)
    }

    pub fn file_too_big(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::FileTooBig, path)
    }

    pub fn name_too_long(path: impl AsRef<str>) -> Self {
        Self::with_path(FsErrorKind::NameTooLong, path)
    }

    pub fn io(message: impl AsRef<str>) -> Self {
        Self::with_message(FsErrorKind::Io, message)
    }
}

impl Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.kind.code())?;
        match &self.message {
            Some(msg) => f.write_str(msg)?,
            None => f.write_str(self.kind.default_message())?,
        }
        if let Some(path) = &self.path {
            write!(f, ": {path}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FsError {}

pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_posix_names() {
        assert_eq!(FsErrorKind::NotFound.code(), "ENOENT");
        assert_eq!(FsErrorKind::NotEmpty.code(), "ENOTEMPTY");
        assert_eq!(FsErrorKind::NameTooLong.code(), "ENAMETOOLONG");
    }

    #[test]
    fn display_includes_code_and_path() {
        let err = FsError::not_found("/missing/file");
        let rendered = err.to_string();
        assert!(rendered.starts_with("ENOENT"));
        assert!(rendered.ends_with("/missing/file"));
    }

    #[test]
    fn message_overrides_default_text() {
        let err = FsError::invalid_argument("cone patterns cannot contain wildcards");
        assert_eq!(
            err.to_string(),
            "EINVAL: cone patterns cannot contain wildcards"
        );
    }
}

use stratafs_model::{BlobId, BlobTier, FsError};
use thiserror::Error;

/// Storage-layer failure below the catalog surface.
///
/// These never escape the crate as-is: the catalog and facade collapse them
/// into [`FsError`] with kind `Io`, keeping the external taxonomy closed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob {0} missing from {1} store")]
    MissingBlob(BlobId, BlobTier),

    #[error("blob integrity check failed: {0}")]
    Integrity(String),

    #[error("no {0} store configured")]
    TierUnavailable(BlobTier),

    #[error("object store I/O: {0}")]
    Io(String),

    #[error("catalog database: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        FsError::io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_model::FsErrorKind;

    #[test]
    fn store_errors_collapse_to_eio() {
        let err: FsError = StoreError::Io("bucket unreachable".into()).into();
        assert_eq!(err.kind(), FsErrorKind::Io);
        assert!(err.to_string().contains("bucket unreachable"));
    }
}

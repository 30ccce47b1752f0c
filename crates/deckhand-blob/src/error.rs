//! Blob store error types.

use thiserror::Error;

/// Result type alias for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("location belongs to bucket {found}, store is bound to {expected}")]
    ForeignBucket { expected: String, found: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid blob configuration: {0}")]
    Config(String),
}

impl From<object_store::Error> for BlobError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound(path),
            other => BlobError::Backend(other.to_string()),
        }
    }
}

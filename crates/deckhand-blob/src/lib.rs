//! deckhand-blob: blob storage for offloaded execution plans.
//!
//! Execution plans can be large, so the orchestrator never puts them on
//! the queue directly. Instead it uploads the serialized plan here and
//! forwards a small [`BlobLocation`] pointer (`{bucket, key, url}`).
//!
//! [`ObjectBlobStore`] adapts any [`object_store::ObjectStore`] backend
//! (in-memory, local filesystem, S3) to the [`BlobStore`] trait.

pub mod error;
pub mod store;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use error::{BlobError, BlobResult};
pub use store::{BlobBackend, BlobConfig, ObjectBlobStore};

/// Pointer to an offloaded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

/// Upload/download capability used by the orchestrator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` under `key` and return where it landed.
    async fn upload(&self, key: &str, body: Bytes) -> BlobResult<BlobLocation>;

    /// Fetch the bytes previously uploaded to `location`.
    async fn download(&self, location: &BlobLocation) -> BlobResult<Bytes>;
}

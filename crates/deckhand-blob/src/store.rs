//! `object_store`-backed implementation of [`BlobStore`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::Deserialize;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::{BlobLocation, BlobStore};

/// Which object store backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    #[default]
    Memory,
    Local,
    S3,
}

/// Blob storage configuration (`[blob]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,
    /// Bucket name recorded in every [`BlobLocation`].
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root directory for the `local` backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Key prefix prepended to every upload.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Base used to build the `url` field. Defaults to `s3://{bucket}`.
    pub base_url: Option<String>,
}

fn default_bucket() -> String {
    "deckhand-plans".to_string()
}

fn default_prefix() -> String {
    "plans".to_string()
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Memory,
            bucket: default_bucket(),
            path: None,
            prefix: default_prefix(),
            region: None,
            endpoint: None,
            base_url: None,
        }
    }
}

/// Blob store over an arbitrary `object_store` backend.
#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    base_url: String,
}

impl ObjectBlobStore {
    /// Wrap a pre-built object store.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: &str, prefix: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            base_url: format!("s3://{bucket}"),
        }
    }

    /// Ephemeral in-memory store (standalone mode and tests).
    pub fn in_memory(bucket: &str) -> Self {
        Self::with_store(Arc::new(InMemory::new()), bucket, "plans")
    }

    /// Override the base used for the `url` field of returned locations.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Build a store from configuration.
    pub fn from_config(config: &BlobConfig) -> BlobResult<Self> {
        let store: Arc<dyn ObjectStore> = match config.backend {
            BlobBackend::Memory => Arc::new(InMemory::new()),
            BlobBackend::Local => {
                let path = config.path.as_deref().ok_or_else(|| {
                    BlobError::Config("local backend requires `path`".to_string())
                })?;
                std::fs::create_dir_all(path)
                    .map_err(|e| BlobError::Config(format!("create {path}: {e}")))?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            BlobBackend::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                Arc::new(builder.build()?)
            }
        };

        let mut blob = Self::with_store(store, &config.bucket, &config.prefix);
        if let Some(base_url) = &config.base_url {
            blob = blob.with_base_url(base_url);
        }
        Ok(blob)
    }

    fn full_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn upload(&self, key: &str, body: Bytes) -> BlobResult<BlobLocation> {
        let full_key = self.full_key(key);
        let size = body.len();
        self.store
            .put(&ObjectPath::from(full_key.as_str()), PutPayload::from(body))
            .await?;
        debug!(bucket = %self.bucket, key = %full_key, size, "blob uploaded");

        Ok(BlobLocation {
            bucket: self.bucket.clone(),
            url: format!("{}/{full_key}", self.base_url),
            key: full_key,
        })
    }

    async fn download(&self, location: &BlobLocation) -> BlobResult<Bytes> {
        if location.bucket != self.bucket {
            return Err(BlobError::ForeignBucket {
                expected: self.bucket.clone(),
                found: location.bucket.clone(),
            });
        }
        let result = self
            .store
            .get(&ObjectPath::from(location.key.as_str()))
            .await?;
        let data = result.bytes().await?;
        debug!(bucket = %location.bucket, key = %location.key, size = data.len(), "blob downloaded");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_returns_same_bytes() {
        let store = ObjectBlobStore::in_memory("plans-test");
        let body = Bytes::from_static(br#"{"status":"pending"}"#);

        let location = store.upload("cvs/dep-1.json", body.clone()).await.unwrap();
        assert_eq!(location.bucket, "plans-test");
        assert_eq!(location.key, "plans/cvs/dep-1.json");
        assert_eq!(location.url, "s3://plans-test/plans/cvs/dep-1.json");

        let fetched = store.download(&location).await.unwrap();
        assert_eq!(fetched, body);
    }

    #[tokio::test]
    async fn download_missing_key_is_not_found() {
        let store = ObjectBlobStore::in_memory("plans-test");
        let location = BlobLocation {
            bucket: "plans-test".to_string(),
            key: "plans/nope.json".to_string(),
            url: String::new(),
        };
        let err = store.download(&location).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_rejects_other_bucket() {
        let store = ObjectBlobStore::in_memory("plans-test");
        let location = BlobLocation {
            bucket: "elsewhere".to_string(),
            key: "plans/x.json".to_string(),
            url: String::new(),
        };
        let err = store.download(&location).await.unwrap_err();
        assert!(matches!(err, BlobError::ForeignBucket { .. }));
    }

    #[tokio::test]
    async fn local_backend_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobConfig {
            backend: BlobBackend::Local,
            path: Some(dir.path().to_string_lossy().to_string()),
            base_url: Some("https://plans.example.com/".to_string()),
            ..BlobConfig::default()
        };
        let store = ObjectBlobStore::from_config(&config).unwrap();

        let location = store
            .upload("int/dep-2.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(location.url, "https://plans.example.com/plans/int/dep-2.json");
        assert!(dir.path().join("plans/int/dep-2.json").exists());
    }

    #[test]
    fn local_backend_requires_path() {
        let config = BlobConfig {
            backend: BlobBackend::Local,
            ..BlobConfig::default()
        };
        assert!(matches!(
            ObjectBlobStore::from_config(&config),
            Err(BlobError::Config(_))
        ));
    }
}

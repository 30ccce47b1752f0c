//! Version resolvers: turn `(feed, path, pattern)` into a concrete version.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::version::highest_matching;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No published version matches. Callers treat this as non-fatal.
    #[error("no version of {feed}/{path} matches {pattern}")]
    NotFound {
        feed: String,
        path: String,
        pattern: String,
    },

    #[error("resolver transport error: {0}")]
    Transport(String),

    #[error("invalid resolver configuration: {0}")]
    Config(String),
}

/// Resolves a version pattern against an artifact feed.
#[async_trait]
pub trait VersionResolver: Send + Sync {
    /// Highest version published under `feed`/`path` that matches `pattern`.
    async fn resolve(&self, feed: &str, path: &str, pattern: &str) -> Result<String, ResolveError>;
}

fn not_found(feed: &str, path: &str, pattern: &str) -> ResolveError {
    ResolveError::NotFound {
        feed: feed.to_string(),
        path: path.to_string(),
        pattern: pattern.to_string(),
    }
}

// ── Catalog ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "artifact")]
    artifacts: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    feed: String,
    path: String,
    versions: Vec<String>,
}

/// Static version lists keyed by `(feed, path)`.
///
/// Loadable from TOML:
///
/// ```toml
/// [[artifact]]
/// feed = "releases"
/// path = "apps/api"
/// versions = ["2.3.1", "2.3.9", "2.4.0"]
/// ```
#[derive(Debug, Default, Clone)]
pub struct CatalogResolver {
    versions: HashMap<(String, String), Vec<String>>,
}

impl CatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions<I, S>(mut self, feed: &str, path: &str, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(feed, path, versions);
        self
    }

    /// Add versions for `feed`/`path`, keeping any already known.
    pub fn insert<I, S>(&mut self, feed: &str, path: &str, versions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions
            .entry((feed.to_string(), path.to_string()))
            .or_default()
            .extend(versions.into_iter().map(Into::into));
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ResolveError> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| ResolveError::Config(e.to_string()))?;
        let mut catalog = Self::new();
        for entry in file.artifacts {
            catalog.insert(&entry.feed, &entry.path, entry.versions);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResolveError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

#[async_trait]
impl VersionResolver for CatalogResolver {
    async fn resolve(&self, feed: &str, path: &str, pattern: &str) -> Result<String, ResolveError> {
        let known = self
            .versions
            .get(&(feed.to_string(), path.to_string()))
            .ok_or_else(|| not_found(feed, path, pattern))?;
        highest_matching(known.iter().map(String::as_str), pattern)
            .map(str::to_string)
            .ok_or_else(|| not_found(feed, path, pattern))
    }
}

// ── HTTP feed ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedListing {
    versions: Vec<String>,
}

/// Resolver backed by an HTTP feed service.
///
/// Lists versions with `GET {base_url}/feeds/{feed}/versions?path={path}`,
/// which answers `{"versions": [...]}` or 404 for an unknown path.
#[derive(Debug, Clone)]
pub struct FeedResolver {
    client: Client,
    base_url: String,
}

impl FeedResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl VersionResolver for FeedResolver {
    async fn resolve(&self, feed: &str, path: &str, pattern: &str) -> Result<String, ResolveError> {
        let url = format!("{}/feeds/{feed}/versions", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let listing: FeedListing = match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ResolveError::Transport(e.to_string()))?,
            StatusCode::NOT_FOUND => return Err(not_found(feed, path, pattern)),
            status => {
                return Err(ResolveError::Transport(format!(
                    "feed listing {url} returned {status}"
                )));
            }
        };
        debug!(%feed, %path, count = listing.versions.len(), "feed versions listed");

        highest_matching(listing.versions.iter().map(String::as_str), pattern)
            .map(str::to_string)
            .ok_or_else(|| not_found(feed, path, pattern))
    }
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolverBackend {
    #[default]
    Catalog,
    Feed,
}

/// Resolver configuration (`[resolver]` section).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResolverConfig {
    #[serde(default)]
    pub backend: ResolverBackend,
    /// TOML catalog for the `catalog` backend. Empty catalog when unset.
    pub catalog_path: Option<String>,
    /// Base URL for the `feed` backend.
    pub feed_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Build the configured resolver.
pub fn build_resolver(config: &ResolverConfig) -> Result<Arc<dyn VersionResolver>, ResolveError> {
    match config.backend {
        ResolverBackend::Catalog => {
            let catalog = match &config.catalog_path {
                Some(path) => CatalogResolver::load(Path::new(path))?,
                None => CatalogResolver::new(),
            };
            Ok(Arc::new(catalog))
        }
        ResolverBackend::Feed => {
            let url = config
                .feed_url
                .as_deref()
                .ok_or_else(|| ResolveError::Config("feed backend requires `feed_url`".to_string()))?;
            Ok(Arc::new(FeedResolver::new(
                url,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?))
        }
    }
}

//! deckhand.toml configuration.
//!
//! Every section and field has a default, so an empty file (or no file)
//! yields a working standalone setup: redb under the data directory,
//! in-memory queue and blob store, empty version catalog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use deckhand_blob::BlobConfig;
use deckhand_cron::CronConfig;
use deckhand_orchestrator::{CallbackConfig, QueueNames};
use deckhand_plan::ResolverConfig;
use deckhand_queue::ConsumerConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeckhandConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub blob: BlobConfig,
    pub resolver: ResolverConfig,
    pub cron: CronConfig,
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/deckhand"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redb,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// redb file. Defaults to `deckhand.redb` in the data directory.
    pub path: Option<PathBuf>,
    /// PostgreSQL connection URL.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redb,
            path: None,
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub primary: String,
    pub execution_template: String,
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
    pub task_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let names = QueueNames::default();
        Self {
            primary: names.primary,
            execution_template: names.execution_template,
            batch_size: 10,
            visibility_timeout_secs: 300,
            task_timeout_secs: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn names(&self) -> QueueNames {
        QueueNames {
            primary: self.primary.clone(),
            execution_template: self.execution_template.clone(),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            queue: self.primary.clone(),
            batch_size: self.batch_size.max(1),
            task_timeout: Duration::from_secs(self.task_timeout_secs.max(1)),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl DeckhandConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn redb_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("deckhand.redb"))
    }
}

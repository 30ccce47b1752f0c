//! deckhandd: the Deckhand daemon.
//!
//! Single binary that assembles every Deckhand component:
//! - State store (redb or PostgreSQL)
//! - Plan generator + REST API
//! - Queue orchestrator behind a batch consumer
//! - Cron trigger
//!
//! # Usage
//!
//! ```text
//! deckhandd --config /etc/deckhand/deckhand.toml serve --port 8080
//! deckhandd --config /etc/deckhand/deckhand.toml seed reference.toml
//! ```

mod config;
mod daemon;
mod seed;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{DeckhandConfig, StoreBackend};
use crate::seed::SeedFile;

const DEFAULT_LOG_FILTER: &str = "info,deckhand=debug,deckhandd=debug";

#[derive(Parser)]
#[command(name = "deckhandd", about = "Deckhand deployment orchestrator")]
struct Cli {
    /// Path to deckhand.toml. Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API, orchestrator and cron trigger.
    Serve {
        /// Port to listen on. Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the embedded store. Overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Load reference data and cron jobs into the embedded store.
    Seed {
        file: PathBuf,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = DeckhandConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            daemon::run(config).await
        }
        Command::Seed { file, data_dir } => {
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            if config.store.backend != StoreBackend::Redb {
                anyhow::bail!("seeding is only supported for the redb store");
            }
            let path = config.redb_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = deckhand_state::StateStore::open(&path)?;
            SeedFile::from_file(&file)?.apply(&store)?;
            info!(path = ?path, "store seeded");
            Ok(())
        }
    }
}

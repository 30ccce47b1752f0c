//! Standalone daemon: every Deckhand component in one process.
//!
//! The standalone daemon queues through an in-process [`MemoryQueue`].
//! Execution queues (`executor-{cluster}`) live in this process only, so no
//! external executor can pick up a handed-off plan and such deployments stay
//! `Scheduled`. Dry runs and up-to-date plans complete normally. A
//! broker-backed [`MessageQueue`] is needed for real executors.

use std::net::SocketAddr;
use std::sync::Arc;

use deckhand_api::{ApiState, build_router};
use deckhand_blob::{BlobStore, ObjectBlobStore};
use deckhand_cron::CronTrigger;
use deckhand_metrics::Metrics;
use deckhand_orchestrator::{HttpCallback, Orchestrator};
use deckhand_plan::{PlanGenerator, build_resolver};
use deckhand_queue::{Consumer, MemoryQueue, MessageQueue};
use deckhand_state::{PgRepository, Repository, StateStore};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{DeckhandConfig, QueueConfig, StoreBackend};

fn in_process_queue_notice(queue: &QueueConfig) -> String {
    format!(
        "execution queues ({}) are in-process only; external executors cannot receive plans \
         and handed-off deployments will stay scheduled",
        queue.execution_template
    )
}

async fn open_repository(config: &DeckhandConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match config.store.backend {
        StoreBackend::Redb => {
            let path = config.redb_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = StateStore::open(&path)?;
            info!(path = ?path, "state store opened");
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres => {
            let url = config
                .store
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("postgres store requires `store.url`"))?;
            let repo = PgRepository::connect(url, config.store.max_connections).await?;
            info!(max_connections = config.store.max_connections, "postgres repository connected");
            Ok(Arc::new(repo))
        }
    }
}

pub async fn run(config: DeckhandConfig) -> anyhow::Result<()> {
    info!("Deckhand daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let repo = open_repository(&config).await?;
    let metrics = Arc::new(Metrics::new());

    let queue: Arc<dyn MessageQueue> =
        Arc::new(MemoryQueue::new(config.queue.visibility_timeout()));
    info!(primary = %config.queue.primary, "in-memory queue initialized");
    warn!("{}", in_process_queue_notice(&config.queue));

    let blob: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::from_config(&config.blob)?);
    info!(backend = ?config.blob.backend, bucket = %config.blob.bucket, "blob store initialized");

    let resolver = build_resolver(&config.resolver)?;
    info!(backend = ?config.resolver.backend, "version resolver initialized");

    let callback = Arc::new(HttpCallback::new(&config.callback)?);

    let generator = Arc::new(PlanGenerator::new(
        repo.clone(),
        resolver,
        queue.clone(),
        config.queue.primary.clone(),
        metrics.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        repo.clone(),
        queue.clone(),
        blob,
        callback,
        config.queue.names(),
        metrics.clone(),
    ));
    let consumer = Consumer::new(
        queue.clone(),
        orchestrator,
        config.queue.consumer(),
        metrics.clone(),
    );

    let cron = CronTrigger::new(
        repo.clone(),
        generator.clone(),
        config.cron.clone(),
        metrics.clone(),
    );

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_shutdown = shutdown_rx.clone();
    let cron_shutdown = shutdown_rx.clone();

    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_shutdown).await;
    });
    let cron_handle = tokio::spawn(async move {
        cron.run(cron_shutdown).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState {
        repo,
        generator,
        metrics,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = consumer_handle.await;
    let _ = cron_handle.await;

    info!("Deckhand daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_notice_names_execution_queues() {
        let mut queue = QueueConfig::default();
        queue.execution_template = "runner-{cluster}".to_string();
        let notice = in_process_queue_notice(&queue);
        assert!(notice.contains("runner-{cluster}"));
        assert!(notice.contains("stay scheduled"));
    }

    #[tokio::test]
    async fn redb_store_creates_its_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DeckhandConfig::default();
        config.server.data_dir = dir.path().join("nested").join("data");
        let repo = open_repository(&config).await.unwrap();
        assert!(repo.cron_jobs().await.unwrap().is_empty());
        assert!(config.redb_path().exists());
    }
}

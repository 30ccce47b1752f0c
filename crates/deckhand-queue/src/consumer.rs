//! Bounded batch consumer.
//!
//! Each cycle receives up to `batch_size` messages, runs one task per
//! message and waits for the whole batch before receiving again, so
//! in-flight work never exceeds the batch size and receives never
//! interleave. A task that exceeds `task_timeout` is abandoned and its
//! message stays unacknowledged until the visibility timeout redelivers it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckhand_metrics::Metrics;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::MessageQueue;
use crate::error::QueueResult;
use crate::message::ReceivedMessage;

/// Processes one delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: fmt::Display + Send + 'static;

    async fn handle(&self, message: ReceivedMessage) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub batch_size: usize,
    pub task_timeout: Duration,
    /// Pause after an empty receive.
    pub poll_interval: Duration,
}

pub struct Consumer<H> {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<H>,
    config: ConsumerConfig,
    metrics: Arc<Metrics>,
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<H>,
        config: ConsumerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            metrics,
        }
    }

    /// Receive and fully process one batch. Returns the batch size.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let batch = self
            .queue
            .receive(&self.config.queue, self.config.batch_size.max(1))
            .await?;
        let received = batch.len();
        if received == 0 {
            return Ok(0);
        }
        debug!(queue = %self.config.queue, received, "batch received");

        let mut tasks = JoinSet::new();
        for message in batch {
            let handler = Arc::clone(&self.handler);
            let timeout = self.config.task_timeout;
            tasks.spawn(async move {
                let message_id = message.message_id.clone();
                let command = message.attributes.command;
                let outcome = tokio::time::timeout(timeout, handler.handle(message)).await;
                (message_id, command, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(Ok(())))) => self.metrics.message_handled(),
                Ok((message_id, command, Ok(Err(e)))) => {
                    self.metrics.message_failed();
                    error!(%message_id, %command, error = %e, "message handling failed");
                }
                Ok((message_id, command, Err(_))) => {
                    self.metrics.message_timed_out();
                    warn!(
                        %message_id,
                        %command,
                        timeout_ms = self.config.task_timeout.as_millis() as u64,
                        "message handling timed out, left for redelivery"
                    );
                }
                Err(e) => {
                    self.metrics.message_failed();
                    error!(error = %e, "message task panicked");
                }
            }
        }
        Ok(received)
    }

    /// Consume until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.config.queue,
            batch_size = self.config.batch_size,
            "consumer started"
        );

        loop {
            let idle = match self.poll_once().await {
                Ok(received) => received == 0,
                Err(e) => {
                    error!(queue = %self.config.queue, error = %e, "receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {
                        info!(queue = %self.config.queue, "consumer shutting down");
                        break;
                    }
                }
            } else if *shutdown.borrow() {
                info!(queue = %self.config.queue, "consumer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use crate::message::{Command, MessageAttributes, OutboundMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Acknowledges messages whose body is "ok", fails "fail", hangs on "slow".
    struct TestHandler {
        queue: Arc<MemoryQueue>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for TestHandler {
        type Error = String;

        async fn handle(&self, message: ReceivedMessage) -> Result<(), String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = match message.body.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
                "fail" => Err("boom".to_string()),
                _ => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    self.queue
                        .delete("primary", &message.receipt_token)
                        .await
                        .map_err(|e| e.to_string())
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn msg(group: &str, body: &str) -> OutboundMessage {
        OutboundMessage::new(
            group,
            body,
            MessageAttributes {
                correlation_id: "corr".to_string(),
                command: Command::ScheduleDeployment,
                deployment_id: group.to_string(),
            },
        )
    }

    fn consumer(queue: Arc<MemoryQueue>, batch_size: usize) -> (Consumer<TestHandler>, Arc<TestHandler>, Arc<Metrics>) {
        let handler = Arc::new(TestHandler {
            queue: Arc::clone(&queue),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let metrics = Arc::new(Metrics::new());
        let consumer = Consumer::new(
            queue,
            Arc::clone(&handler),
            ConsumerConfig {
                queue: "primary".to_string(),
                batch_size,
                task_timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(10),
            },
            Arc::clone(&metrics),
        );
        (consumer, handler, metrics)
    }

    #[tokio::test]
    async fn batch_concurrency_is_capped() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        for i in 0..5 {
            queue.send("primary", msg(&format!("g{i}"), "ok")).await.unwrap();
        }
        let (consumer, handler, metrics) = consumer(Arc::clone(&queue), 2);

        assert_eq!(consumer.poll_once().await.unwrap(), 2);
        assert_eq!(consumer.poll_once().await.unwrap(), 2);
        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(consumer.poll_once().await.unwrap(), 0);

        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(metrics.snapshot().messages_handled, 5);
        assert!(queue.is_empty("primary").await);
    }

    #[tokio::test]
    async fn failures_and_timeouts_leave_messages_queued() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        queue.send("primary", msg("a", "fail")).await.unwrap();
        queue.send("primary", msg("b", "slow")).await.unwrap();
        queue.send("primary", msg("c", "ok")).await.unwrap();
        let (consumer, _, metrics) = consumer(Arc::clone(&queue), 10);

        assert_eq!(consumer.poll_once().await.unwrap(), 3);

        let s = metrics.snapshot();
        assert_eq!(s.messages_handled, 1);
        assert_eq!(s.message_failures, 1);
        assert_eq!(s.message_timeouts, 1);
        assert_eq!(queue.len("primary").await, 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        queue.send("primary", msg("a", "ok")).await.unwrap();
        let (consumer, _, metrics) = consumer(Arc::clone(&queue), 4);

        let (tx, rx) = watch::channel(false);
        let consumer = Arc::new(consumer);
        let runner = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.snapshot().messages_handled, 1);
    }
}

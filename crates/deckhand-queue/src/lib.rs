//! deckhand-queue: message transport for Deckhand.
//!
//! The orchestrator talks to two kinds of queue through [`MessageQueue`]:
//! the primary queue (schedule requests and executor reports) and one
//! execution queue per cluster. Both are FIFO with group lanes: within a
//! group only the head message is deliverable, and the next one becomes
//! visible only once the head is deleted.
//!
//! [`MemoryQueue`] is the in-process broker used by the standalone daemon
//! and tests. [`Consumer`] drives a [`MessageHandler`] in bounded batches.

pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;

use async_trait::async_trait;

pub use consumer::{Consumer, ConsumerConfig, MessageHandler};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{
    Command, MessageAttributes, OutboundMessage, ReceivedMessage, deploy_group,
    execution_queue_name, update_group,
};

/// FIFO group-lane message transport.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a message to `queue` and return its message id.
    async fn send(&self, queue: &str, message: OutboundMessage) -> QueueResult<String>;

    /// Receive up to `max` deliverable messages, at most one per group.
    async fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<ReceivedMessage>>;

    /// Acknowledge a delivery, removing its message from the queue.
    async fn delete(&self, queue: &str, receipt_token: &str) -> QueueResult<()>;
}

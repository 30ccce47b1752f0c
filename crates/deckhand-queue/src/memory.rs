//! In-process FIFO broker with group lanes and visibility timeouts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::message::{OutboundMessage, ReceivedMessage};
use crate::MessageQueue;

struct StoredMessage {
    id: String,
    message: OutboundMessage,
    /// Receipt of the current delivery, if any.
    receipt: Option<String>,
    /// While in the future, the message is in flight and its lane is blocked.
    invisible_until: Option<Instant>,
    receive_count: u32,
}

impl StoredMessage {
    fn in_flight(&self, now: Instant) -> bool {
        self.invisible_until.is_some_and(|until| until > now)
    }
}

/// Named FIFO queues kept in memory. Queues are created on first send.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    /// Number of messages in `queue`, in flight or not.
    pub async fn len(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }

    /// Undelivered copies of every message in `queue`, in submission order.
    pub async fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send(&self, queue: &str, message: OutboundMessage) -> QueueResult<String> {
        let id = Uuid::new_v4().to_string();
        debug!(%queue, message_id = %id, group_id = %message.group_id, command = %message.attributes.command, "message sent");
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                id: id.clone(),
                message,
                receipt: None,
                invisible_until: None,
                receive_count: 0,
            });
        Ok(id)
    }

    async fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        let Some(messages) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut seen_groups = HashSet::new();
        let mut delivered = Vec::new();
        for stored in messages.iter_mut() {
            if delivered.len() >= max {
                break;
            }
            // Only the first message of each group is a candidate.
            if !seen_groups.insert(stored.message.group_id.clone()) {
                continue;
            }
            if stored.in_flight(now) {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            stored.receipt = Some(receipt.clone());
            stored.invisible_until = Some(now + self.visibility_timeout);
            stored.receive_count += 1;
            trace!(%queue, message_id = %stored.id, receive_count = stored.receive_count, "message delivered");

            delivered.push(ReceivedMessage {
                message_id: stored.id.clone(),
                receipt_token: receipt,
                group_id: stored.message.group_id.clone(),
                body: stored.message.body.clone(),
                attributes: stored.message.attributes.clone(),
                receive_count: stored.receive_count,
            });
        }
        Ok(delivered)
    }

    async fn delete(&self, queue: &str, receipt_token: &str) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
        let position = messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt_token))
            .ok_or_else(|| QueueError::ReceiptNotFound(receipt_token.to_string()))?;
        if let Some(removed) = messages.remove(position) {
            debug!(%queue, message_id = %removed.id, "message deleted");
        }
        Ok(())
    }
}

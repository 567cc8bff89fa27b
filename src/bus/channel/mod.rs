//! In-memory channel-based broker for standalone mode.
//!
//! Emulates a topic exchange inside a single process: every bound queue is an
//! unbounded tokio channel, and publishing copies the payload into each queue
//! whose pattern matches the routing key. Ideal for local development and
//! testing without external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::routing::topic_matches;
use super::{Binding, BindingMode, Broker, BusError, QueueHandle, Result, Routing};

/// A bound in-process queue.
struct Queue {
    pattern: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// In-memory broker using tokio channels.
///
/// Queues are dropped on unbind, which closes their channel and ends the
/// consumer's delivery stream.
pub struct ChannelBroker {
    routing: Routing,
    queues: RwLock<HashMap<String, Queue>>,
    closed: AtomicBool,
}

impl ChannelBroker {
    /// Create a new channel broker.
    pub fn new(routing: Routing) -> Self {
        info!(prefix = %routing.prefix(), "Channel broker initialized");

        Self {
            routing,
            queues: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of currently bound queues.
    pub async fn queue_count(&self) -> usize {
        self.queues.read().await.len()
    }

    /// Binding patterns of currently bound queues.
    pub async fn patterns(&self) -> Vec<String> {
        self.queues
            .read()
            .await
            .values()
            .map(|q| q.pattern.clone())
            .collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Connection("channel broker is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new(Routing::default())
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn declare(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn bind(&self, topic: &str, mode: BindingMode) -> Result<Binding> {
        self.ensure_open()?;

        let pattern = self.routing.binding_pattern(topic, mode);
        let name = format!("channel.gen-{}", Uuid::new_v4());
        let (sender, receiver) = mpsc::unbounded_channel();

        self.queues.write().await.insert(
            name.clone(),
            Queue {
                pattern: pattern.clone(),
                sender,
            },
        );

        debug!(queue = %name, pattern = %pattern, "Bound channel queue");

        Ok(Binding {
            queue: QueueHandle {
                consumer_tag: name.clone(),
                name,
            },
            pattern,
            deliveries: UnboundedReceiverStream::new(receiver).map(Ok).boxed(),
        })
    }

    async fn unbind(&self, queue: &QueueHandle) -> Result<()> {
        self.ensure_open()?;

        if self.queues.write().await.remove(&queue.name).is_some() {
            debug!(queue = %queue.name, "Unbound channel queue");
        }
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let queues = self.queues.read().await;
        let mut receivers = 0;
        for queue in queues.values() {
            if topic_matches(&queue.pattern, routing_key) && queue.sender.send(payload.clone()).is_ok()
            {
                receivers += 1;
            }
        }

        debug!(
            routing_key = %routing_key,
            receivers,
            "Published payload to channel queues"
        );

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.queues.write().await.clear();
        info!("Channel broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests;

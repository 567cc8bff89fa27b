//! Subscription registry and per-subscription consumer loops.
//!
//! The registry maps `(topic, id)` to the live subscription. Each entry owns a
//! stop signal for its consumer loop: dropping the entry's sender closes the
//! signal channel, and the loop exits before touching another delivery.
//! A retired entry keeps the loop's task handle so teardown can wait for an
//! in-flight delivery to finish before the handler is cancelled.
//! The registry lock is only held for map operations, never across broker I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

use super::{Binding, Deliveries, MessageHandler, QueueHandle};
use crate::message;

type Key = (String, String);

/// Live subscription record.
struct Entry {
    queue: QueueHandle,
    handler: Arc<dyn MessageHandler>,
    consumer: JoinHandle<()>,
    /// Dropped to stop the consumer loop.
    _stop: oneshot::Sender<()>,
}

/// A subscription taken out of the registry.
///
/// Its consumer loop has been signalled to stop; the queue and handler still
/// need releasing by the caller, after `join_consumer`.
pub struct Retired {
    pub topic: String,
    pub id: String,
    pub queue: QueueHandle,
    pub handler: Arc<dyn MessageHandler>,
    consumer: Option<JoinHandle<()>>,
}

impl Retired {
    /// Wait for the consumer loop to exit.
    ///
    /// A delivery already handed to the handler runs to completion first. If
    /// the loop has not exited within `timeout` it is aborted.
    pub async fn join_consumer(&mut self, timeout: Duration) {
        let Some(mut consumer) = self.consumer.take() else {
            return;
        };

        if tokio::time::timeout(timeout, &mut consumer).await.is_err() {
            warn!(
                topic = %self.topic,
                id = %self.id,
                timeout_ms = timeout.as_millis() as u64,
                "Consumer loop did not stop in time, aborting"
            );
            consumer.abort();
            let _ = consumer.await;
        }
    }
}

impl Entry {
    fn retire(self, (topic, id): Key) -> Retired {
        Retired {
            topic,
            id,
            queue: self.queue,
            handler: self.handler,
            consumer: Some(self.consumer),
        }
    }
}

/// Concurrent map of active subscriptions.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<Key, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bound subscription and start its consumer loop.
    ///
    /// Returns the entry it replaced, if `(topic, id)` was already registered.
    /// The swap happens under the registry lock, so exactly one entry is live
    /// for the key afterwards.
    pub async fn insert(
        &self,
        topic: &str,
        id: &str,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Retired> {
        let key = (topic.to_string(), id.to_string());
        let (stop_tx, stop_rx) = oneshot::channel();

        let span = tracing::info_span!("consumer", topic = %topic, id = %id, queue = %binding.queue.name);
        let consumer =
            tokio::spawn(consume(binding.deliveries, Arc::clone(&handler), stop_rx).instrument(span));

        let entry = Entry {
            queue: binding.queue,
            handler,
            consumer,
            _stop: stop_tx,
        };

        let previous = self.entries.lock().await.insert(key.clone(), entry);
        previous.map(|old| old.retire(key))
    }

    /// Remove the `(topic, id)` entry, stopping its consumer loop.
    pub async fn remove(&self, topic: &str, id: &str) -> Option<Retired> {
        let key = (topic.to_string(), id.to_string());
        let entry = self.entries.lock().await.remove(&key);
        entry.map(|e| e.retire(key))
    }

    /// Remove every entry, stopping all consumer loops.
    pub async fn drain(&self) -> Vec<Retired> {
        let mut entries = self.entries.lock().await;
        entries
            .drain()
            .map(|(key, entry)| entry.retire(key))
            .collect()
    }

    pub async fn contains(&self, topic: &str, id: &str) -> bool {
        self.entries
            .lock()
            .await
            .contains_key(&(topic.to_string(), id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Consumer loop: deliver each message to the handler, one at a time, in
/// broker order, until the stop signal closes or the delivery stream ends.
async fn consume(
    mut deliveries: Deliveries,
    handler: Arc<dyn MessageHandler>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut stop => break,

            next = deliveries.next() => match next {
                Some(Ok(payload)) => match message::decode(&payload) {
                    Ok(message) => {
                        if let Err(e) = handler.handle(message).await {
                            warn!(error = %e, "Handler failed, continuing delivery");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, bytes = payload.len(), "Failed to decode message");
                    }
                },
                Some(Err(e)) => {
                    error!(error = %e, "Delivery stream failed");
                    break;
                }
                None => break,
            },
        }
    }

    debug!("Consumer loop stopped");
}

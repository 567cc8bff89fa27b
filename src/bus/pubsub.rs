//! Broker-backed publish/subscribe facade.
//!
//! Composes a `Broker`, the routing scheme and the subscription registry into
//! the `Publisher`/`PubSub` surface.
//!
//! Re-subscribing an existing `(id, topic)` binds the new queue first, swaps
//! the registry entry, then retires the old one. The old consumer loop never
//! runs the old handler after the swap. Messages the old queue held but had not
//! yet handed over when it was retired are dropped with it: a subscriber can
//! miss messages published before the replacement was bound.
//!
//! Retiring an entry stops its consumer loop and waits for any delivery the
//! handler is still processing (bounded by the operation timeout) before the
//! queue is unbound and the handler cancelled.
//!
//! Topics are keyed in canonical form (see `routing::canonical_topic`), so
//! `orders/returns` and `orders.returns` name the same subscription.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{Registry, Retired};
use super::routing::canonical_topic;
use super::{
    Binding, BindingMode, Broker, BusError, PubSub, Publisher, Result, Routing,
    SubscriberConfig,
};
use crate::message::{self, Message};

/// Topic-based pub/sub over any `Broker`.
pub struct TopicPubSub {
    broker: Arc<dyn Broker>,
    routing: Routing,
    registry: Registry,
    timeout: Duration,
    /// Set by the first `close`; rejects further operations.
    closed: AtomicBool,
    /// Whether the broker connection has been released.
    released: Mutex<bool>,
}

impl TopicPubSub {
    /// Create the facade and declare the broker topology.
    pub async fn new(broker: Arc<dyn Broker>, routing: Routing, timeout: Duration) -> Result<Self> {
        let pubsub = Self {
            broker,
            routing,
            registry: Registry::new(),
            timeout,
            closed: AtomicBool::new(false),
            released: Mutex::new(false),
        };

        pubsub.bounded("declare", pubsub.broker.declare()).await?;
        Ok(pubsub)
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.registry.len().await
    }

    /// Whether `(id, topic)` has a live subscription.
    pub async fn is_subscribed(&self, id: &str, topic: &str) -> bool {
        self.registry.contains(&canonical_topic(topic), id).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// Bound one broker round-trip by the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| BusError::Timeout {
                operation,
                timeout: self.timeout,
            })?
    }

    /// Release a retired entry: wait out its consumer loop, then unbind its
    /// queue and cancel its handler.
    ///
    /// Both release steps always run. Returns `(unbind, cancel)` outcomes.
    async fn retire(&self, retired: &mut Retired) -> (Result<()>, Result<()>) {
        retired.join_consumer(self.timeout).await;
        let unbind = self.bounded("unbind", self.broker.unbind(&retired.queue)).await;
        let cancel = retired.handler.cancel().await;
        (unbind, cancel)
    }
}

/// A bind running on its own task.
///
/// If dropped before the bind completes (timeout or caller cancellation), it
/// unbinds whatever queue the broker eventually returns.
struct PendingBind {
    broker: Arc<dyn Broker>,
    task: Option<JoinHandle<Result<Binding>>>,
}

impl PendingBind {
    fn spawn(broker: Arc<dyn Broker>, topic: &str, mode: BindingMode) -> Self {
        let task = tokio::spawn({
            let broker = Arc::clone(&broker);
            let topic = topic.to_string();
            async move { broker.bind(&topic, mode).await }
        });
        Self {
            broker,
            task: Some(task),
        }
    }

    async fn wait(&mut self) -> Result<Binding> {
        let Some(task) = self.task.as_mut() else {
            return Err(BusError::Subscribe("bind already awaited".to_string()));
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| BusError::Subscribe(format!("Bind task failed: {}", e)))?
    }
}

impl Drop for PendingBind {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            task.abort();
            return;
        };

        let broker = Arc::clone(&self.broker);
        runtime.spawn(async move {
            if let Ok(Ok(binding)) = task.await {
                match broker.unbind(&binding.queue).await {
                    Ok(()) => debug!(queue = %binding.queue.name, "Released abandoned bind"),
                    Err(e) => {
                        warn!(queue = %binding.queue.name, error = %e, "Failed to release abandoned bind")
                    }
                }
            }
        });
    }
}

fn validate(id: &str, topic: &str) -> Result<()> {
    if id.is_empty() {
        return Err(BusError::EmptyId);
    }
    if topic.is_empty() {
        return Err(BusError::EmptyTopic);
    }
    Ok(())
}

#[async_trait]
impl Publisher for TopicPubSub {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        self.ensure_open()?;

        let routing_key = self.routing.routing_key(topic, message)?;
        let payload = message::encode(message);

        self.bounded("publish", self.broker.publish(&routing_key, payload))
            .await?;

        debug!(routing_key = %routing_key, "Published message");
        Ok(())
    }

    /// Close the facade. Safe to call repeatedly: once the broker connection
    /// has been released this is a no-op, and a failed broker close is retried
    /// by the next call.
    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);

        let mut released = self.released.lock().await;
        if *released {
            return Ok(());
        }

        let retired = self.registry.drain().await;
        let count = retired.len();
        for mut entry in retired {
            let (unbind, cancel) = self.retire(&mut entry).await;
            if let Err(e) = unbind {
                warn!(topic = %entry.topic, id = %entry.id, error = %e, "Failed to unbind on close");
            }
            if let Err(e) = cancel {
                debug!(topic = %entry.topic, id = %entry.id, error = %e, "Handler cancel failed on close");
            }
        }

        self.bounded("close", self.broker.close()).await?;
        *released = true;
        info!(subscriptions = count, "Pub/sub closed");
        Ok(())
    }
}

#[async_trait]
impl PubSub for TopicPubSub {
    async fn subscribe(&self, config: SubscriberConfig) -> Result<()> {
        let SubscriberConfig { id, topic, handler } = config;
        let topic = canonical_topic(&topic);
        validate(&id, &topic)?;
        self.ensure_open()?;

        let mode = BindingMode::for_topic(&topic);
        let mut pending = PendingBind::spawn(Arc::clone(&self.broker), &topic, mode);
        let binding = self.bounded("bind", pending.wait()).await?;
        let pattern = binding.pattern.clone();

        if let Some(mut previous) = self.registry.insert(&topic, &id, binding, handler).await {
            let (unbind, cancel) = self.retire(&mut previous).await;
            if let Err(e) = unbind {
                warn!(topic = %topic, id = %id, error = %e, "Failed to unbind replaced subscription");
            }
            if let Err(e) = cancel {
                warn!(topic = %topic, id = %id, error = %e, "Replaced handler failed to cancel");
            }
            debug!(topic = %topic, id = %id, "Replaced existing subscription");
        }

        // Lost a race with close: the drain may have missed this entry
        if self.closed.load(Ordering::Acquire) {
            if let Some(mut orphan) = self.registry.remove(&topic, &id).await {
                let _ = self.retire(&mut orphan).await;
            }
            return Err(BusError::Closed);
        }

        info!(topic = %topic, id = %id, pattern = %pattern, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()> {
        let topic = canonical_topic(topic);
        validate(id, &topic)?;
        self.ensure_open()?;

        let mut retired = self
            .registry
            .remove(&topic, id)
            .await
            .ok_or(BusError::NotSubscribed)?;

        let (unbind, cancel) = self.retire(&mut retired).await;
        info!(topic = %topic, id = %id, "Unsubscribed");

        cancel?;
        unbind
    }
}

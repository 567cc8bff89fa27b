//! Tracing instrumentation advice.
//!
//! Wraps the pub/sub surface to record a span, latency and outcome for each
//! call without modifying the wrapped implementation.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use crate::bus::{PubSub, Publisher, Result, SubscriberConfig};
use crate::message::Message;

/// Wrapper that adds tracing instrumentation to any pub/sub implementation.
///
/// Every call runs inside a span named after the operation
/// (`pubsub.publish`, `pubsub.subscribe`, `pubsub.unsubscribe`,
/// `pubsub.close`) carrying the transport label, and emits one event with the
/// elapsed milliseconds: `debug` on success, `warn` on failure. Arguments and
/// results pass through untouched.
///
/// # Example
///
/// ```ignore
/// let pubsub = bus::connect(&config).await?;
/// let pubsub = Instrumented::new(pubsub, "amqp");
/// ```
pub struct Instrumented<T> {
    inner: T,
    transport: &'static str,
}

impl<T> Instrumented<T> {
    /// Wrap an implementation with tracing instrumentation.
    ///
    /// # Arguments
    /// * `inner` - The implementation to wrap
    /// * `transport` - Label recorded on spans (e.g., "amqp", "channel")
    pub fn new(inner: T, transport: &'static str) -> Self {
        Self { inner, transport }
    }

    /// Get a reference to the inner implementation.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Consume the wrapper and return the inner implementation.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn record<R>(operation: &'static str, start: Instant, result: &Result<R>) {
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(_) => debug!(operation, elapsed_ms, "ok"),
        Err(e) => warn!(operation, elapsed_ms, error = %e, "failed"),
    }
}

#[async_trait]
impl<T: Publisher> Publisher for Instrumented<T> {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        let span = tracing::info_span!(
            "pubsub.publish",
            transport = self.transport,
            topic = %topic,
            subtopic = %message.subtopic,
            bytes = message.payload.len()
        );
        async {
            let start = Instant::now();
            let result = self.inner.publish(topic, message).await;
            record("publish", start, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn close(&self) -> Result<()> {
        let span = tracing::info_span!("pubsub.close", transport = self.transport);
        async {
            let start = Instant::now();
            let result = self.inner.close().await;
            record("close", start, &result);
            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<T: PubSub> PubSub for Instrumented<T> {
    async fn subscribe(&self, config: SubscriberConfig) -> Result<()> {
        let span = tracing::info_span!(
            "pubsub.subscribe",
            transport = self.transport,
            topic = %config.topic,
            id = %config.id
        );
        async {
            let start = Instant::now();
            let result = self.inner.subscribe(config).await;
            record("subscribe", start, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()> {
        let span = tracing::info_span!(
            "pubsub.unsubscribe",
            transport = self.transport,
            topic = %topic,
            id = %id
        );
        async {
            let start = Instant::now();
            let result = self.inner.unsubscribe(id, topic).await;
            record("unsubscribe", start, &result);
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{connect, BusError, MessagingConfig};
    use crate::test_utils::RecordingHandler;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_instrumented_passes_through() {
        let pubsub = Instrumented::new(connect(&MessagingConfig::channel()).await.unwrap(), "channel");
        let (handler, mut recording) = RecordingHandler::new();

        pubsub
            .subscribe(SubscriberConfig::new("a", "orders", Arc::new(handler)))
            .await
            .unwrap();

        let message = Message {
            payload: b"hello".to_vec(),
            ..Default::default()
        };
        pubsub.publish("orders", &message).await.unwrap();
        assert_eq!(recording.next().await.unwrap(), message);

        pubsub.unsubscribe("a", "orders").await.unwrap();
        assert_eq!(pubsub.inner().subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_instrumented_preserves_errors() {
        let pubsub = Instrumented::new(connect(&MessagingConfig::channel()).await.unwrap(), "channel");

        assert!(matches!(
            pubsub.unsubscribe("a", "orders").await,
            Err(BusError::NotSubscribed)
        ));

        pubsub.close().await.unwrap();
        assert!(matches!(
            pubsub.publish("orders", &Message::default()).await,
            Err(BusError::Closed)
        ));
    }
}

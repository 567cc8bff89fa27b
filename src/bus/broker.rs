//! Broker connection primitives.
//!
//! A `Broker` owns one long-lived connection to the transport and the topic
//! exchange every publication goes through. Subscriptions get their own
//! exclusive queue, bound with a pattern derived from the topic, whose
//! deliveries arrive as a stream that ends once the queue is unbound.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{BindingMode, Result};

/// Raw envelope payloads delivered to one queue, in broker order.
///
/// The stream ends when the queue is unbound or the connection closes.
pub type Deliveries = BoxStream<'static, Result<Vec<u8>>>;

/// Opaque handle to a subscription's queue and consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    /// Broker-assigned queue name.
    pub name: String,
    /// Consumer tag delivering from the queue.
    pub consumer_tag: String,
}

/// A freshly bound queue together with its delivery stream.
pub struct Binding {
    pub queue: QueueHandle,
    /// Pattern the queue is bound with.
    pub pattern: String,
    pub deliveries: Deliveries,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("queue", &self.queue)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Exchange/queue primitives a transport provides.
///
/// All operations fail with a transport error once the connection is gone;
/// none of them reconnect.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via AMQP 0-9-1
/// - `ChannelBroker`: in-process, for tests and single-process deployments
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare the durable topic exchange. Idempotent.
    async fn declare(&self) -> Result<()>;

    /// Create an exclusive, auto-deleting queue bound for `topic`.
    async fn bind(&self, topic: &str, mode: BindingMode) -> Result<Binding>;

    /// Stop the queue's consumer and delete the queue with its binding.
    async fn unbind(&self, queue: &QueueHandle) -> Result<()>;

    /// Send a payload to the exchange under `routing_key`.
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Close the connection. Later calls fail.
    async fn close(&self) -> Result<()>;
}

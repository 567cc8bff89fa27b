//! Topic-based publish/subscribe over a message broker.
//!
//! This module contains:
//! - `Publisher` / `PubSub` traits: the service surface protocol adapters use
//! - `MessageHandler` trait: per-subscription delivery capability
//! - `Broker` trait: exchange/queue primitives a transport must provide
//! - `TopicPubSub`: the facade composing a broker, routing and the registry
//! - Bus configuration types and the `connect` factory
//! - Transports: AMQP (RabbitMQ), in-process channels

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use crate::message::Message;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod channel;
pub mod pubsub;
pub mod registry;
pub mod routing;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use broker::{Binding, Broker, Deliveries, QueueHandle};
pub use channel::ChannelBroker;
pub use pubsub::TopicPubSub;
pub use routing::{BindingMode, Routing};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Empty topic")]
    EmptyTopic,

    #[error("Empty subscriber id")]
    EmptyId,

    #[error("Not subscribed")]
    NotSubscribed,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Pub/sub is closed")]
    Closed,

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl BusError {
    /// Whether the error came from the transport rather than the caller's input
    /// or a handler.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_)
                | BusError::Publish(_)
                | BusError::Subscribe(_)
                | BusError::Unsubscribe(_)
                | BusError::Timeout { .. }
                | BusError::Closed
        )
    }
}

/// Capability a subscriber hands to `subscribe`.
///
/// `handle` is called once per delivered message, strictly in delivery order
/// and never concurrently for the same subscription. A `handle` error is
/// logged and delivery continues. `cancel` is called exactly once when the
/// subscription is torn down.
pub trait MessageHandler: Send + Sync {
    /// Process one delivered message.
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<()>>;

    /// Release whatever the handler holds for this subscription.
    fn cancel(&self) -> BoxFuture<'static, Result<()>>;
}

/// Subscription request.
#[derive(Clone)]
pub struct SubscriberConfig {
    /// Subscriber identity, unique per topic.
    pub id: String,
    /// Topic to subscribe to.
    pub topic: String,
    /// Handler receiving deliveries.
    pub handler: Arc<dyn MessageHandler>,
}

impl SubscriberConfig {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for SubscriberConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberConfig")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Publishing half of the service surface.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a message under `topic`.
    ///
    /// Fire-and-forget at the transport level: returns once the broker has the
    /// message, without waiting for subscribers. Never retried internally.
    async fn publish(&self, topic: &str, message: &Message) -> Result<()>;

    /// Tear down all subscriptions and release the broker connection.
    async fn close(&self) -> Result<()>;
}

/// Full publish/subscribe service surface.
///
/// Implementations:
/// - `TopicPubSub`: broker-backed facade
/// - `Instrumented`: tracing decorator around any `PubSub`
#[async_trait]
pub trait PubSub: Publisher {
    /// Subscribe `config.handler` to `config.topic` as `config.id`.
    ///
    /// Subscribing an existing `(id, topic)` pair replaces the previous
    /// subscription.
    async fn subscribe(&self, config: SubscriberConfig) -> Result<()>;

    /// Remove the `(id, topic)` subscription.
    ///
    /// The subscription is always removed once found; the result reports the
    /// handler's own `cancel` outcome.
    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()>;
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        (**self).publish(topic, message).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: PubSub + ?Sized> PubSub for Arc<T> {
    async fn subscribe(&self, config: SubscriberConfig) -> Result<()> {
        (**self).subscribe(config).await
    }

    async fn unsubscribe(&self, id: &str, topic: &str) -> Result<()> {
        (**self).unsubscribe(id, topic).await
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Default AMQP exchange carrying all traffic.
pub const DEFAULT_EXCHANGE: &str = "messages";

/// Default bound on each broker round-trip.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// AMQP/RabbitMQ messaging.
    #[default]
    Amqp,
    /// In-process channels (no external broker).
    Channel,
}

impl MessagingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingType::Amqp => "amqp",
            MessagingType::Channel => "channel",
        }
    }
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// AMQP-specific configuration.
    pub amqp: AmqpBusConfig,
    /// Namespace prefix for every routing key.
    pub prefix: String,
    /// Bound on each broker round-trip, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Amqp,
            amqp: AmqpBusConfig::default(),
            prefix: routing::DEFAULT_PREFIX.to_string(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
        }
    }
}

impl MessagingConfig {
    /// Config for the in-process transport.
    pub fn channel() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            ..Default::default()
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn routing(&self) -> Routing {
        Routing::new(&self.prefix)
    }
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpBusConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange carrying all traffic.
    pub exchange: String,
}

impl Default for AmqpBusConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Connect a `TopicPubSub` over the configured transport.
///
/// Requires the corresponding feature for AMQP (`--features amqp`, on by
/// default). The in-process transport is always available.
pub async fn connect(config: &MessagingConfig) -> Result<TopicPubSub> {
    let routing = config.routing();

    let broker: Arc<dyn Broker> = match config.messaging_type {
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                Arc::new(
                    AmqpBroker::connect(&config.amqp.url, &config.amqp.exchange, routing.clone())
                        .await?,
                )
            }

            #[cfg(not(feature = "amqp"))]
            {
                return Err(BusError::Connection(
                    "AMQP support requires the 'amqp' feature. Rebuild with --features amqp"
                        .to_string(),
                ));
            }
        }
        MessagingType::Channel => Arc::new(ChannelBroker::new(routing.clone())),
    };

    let pubsub = TopicPubSub::new(broker, routing, config.operation_timeout()).await?;
    info!(
        messaging_type = config.messaging_type.as_str(),
        prefix = %config.prefix,
        "Pub/sub initialized"
    );
    Ok(pubsub)
}

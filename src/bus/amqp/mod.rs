//! AMQP (RabbitMQ) broker implementation.
//!
//! Uses a durable topic exchange for routing messages to subscribers. One
//! connection and one channel are shared by every publish and bind; each
//! subscription gets an exclusive, auto-deleting, server-named queue.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Binding, BindingMode, Broker, BusError, QueueHandle, Result, Routing};

/// Content type stamped on every published envelope.
const CONTENT_TYPE: &str = "application/protobuf";

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// AMQP broker using RabbitMQ.
///
/// Messages are published to a topic exchange with routing key
/// `{prefix}.{topic}[.{channel}][.{subtopic}]`. Subscriber queues bind with the
/// exact key or with a trailing `#` for hierarchical subscriptions.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    exchange: String,
    routing: Routing,
    closed: AtomicBool,
}

impl AmqpBroker {
    /// Connect to the broker, open the shared channel and declare the exchange.
    pub async fn connect(url: &str, exchange: &str, routing: Routing) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        let broker = Self {
            connection,
            channel,
            exchange: exchange.to_string(),
            routing,
            closed: AtomicBool::new(false),
        };
        broker.declare().await?;

        info!(
            exchange = %broker.exchange,
            url = %url,
            "Connected to AMQP"
        );

        Ok(broker)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if !self.connection.status().connected() {
            return Err(BusError::Connection(
                "AMQP connection is not connected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare(&self) -> Result<()> {
        self.ensure_open()?;

        self.channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))
    }

    async fn bind(&self, topic: &str, mode: BindingMode) -> Result<Binding> {
        self.ensure_open()?;

        let pattern = self.routing.binding_pattern(topic, mode);

        // Server-named queue, removed with its bindings when the consumer or
        // connection goes away
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;
        let name = queue.name().as_str().to_string();

        self.channel
            .queue_bind(
                &name,
                &self.exchange,
                &pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {}", e)))?;

        let consumer_tag = format!("fluxbus-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                &name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(
            queue = %name,
            pattern = %pattern,
            "Bound queue to exchange"
        );

        let deliveries = consumer
            .map(|delivery| {
                delivery
                    .map(|d| d.data)
                    .map_err(|e| BusError::Connection(format!("Delivery failed: {}", e)))
            })
            .boxed();

        Ok(Binding {
            queue: QueueHandle { name, consumer_tag },
            pattern,
            deliveries,
        })
    }

    async fn unbind(&self, queue: &QueueHandle) -> Result<()> {
        self.ensure_open()?;

        if let Err(e) = self
            .channel
            .basic_cancel(&queue.consumer_tag, BasicCancelOptions::default())
            .await
        {
            // Deleting the queue below cancels the consumer anyway
            warn!(consumer_tag = %queue.consumer_tag, error = %e, "Failed to cancel consumer");
        }

        self.channel
            .queue_delete(&queue.name, QueueDeleteOptions::default())
            .await
            .map_err(|e| BusError::Unsubscribe(format!("Failed to delete queue: {}", e)))?;

        debug!(queue = %queue.name, "Deleted queue");
        Ok(())
    }

    #[tracing::instrument(name = "amqp.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let properties = BasicProperties::default().with_content_type(CONTENT_TYPE.into());

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            bytes = payload.len(),
            "Published message"
        );
        Ok(())
    }

    /// Close the channel and connection. Retries the connection close if an
    /// earlier attempt left it connected.
    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.channel.close(REPLY_SUCCESS, "closing").await {
                warn!(error = %e, "Failed to close channel");
            }
        } else if !self.connection.status().connected() {
            return Ok(());
        }

        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| BusError::Connection(format!("Failed to close connection: {}", e)))?;

        info!(exchange = %self.exchange, "AMQP connection closed");
        Ok(())
    }
}


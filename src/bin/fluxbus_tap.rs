//! fluxbus-tap: Traffic tap
//!
//! Subscribes to a topic and logs every delivered message. Useful for
//! debugging adapters and watching traffic flow through the broker.
//!
//! ## Usage
//! ```text
//! fluxbus-tap [TOPIC]
//! ```
//! TOPIC defaults to `>`, i.e. everything under the routing prefix.
//!
//! ## Configuration
//! - FLUXBUS_CONFIG: Path to YAML configuration (optional)
//! - FLUXBUS__MESSAGING__AMQP__URL: RabbitMQ connection string
//! - FLUXBUS_LOG: Log filter (default: info)

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, info};

use fluxbus::advice::Instrumented;
use fluxbus::bus::{self, MessageHandler, PubSub, Publisher, Result, SubscriberConfig};
use fluxbus::config::Config;
use fluxbus::message::Message;
use fluxbus::utils::bootstrap::{connect_with_retry, init_tracing};

const DEFAULT_TOPIC: &str = ">";
const TAP_ID: &str = "fluxbus-tap";

/// Logs each delivery.
struct LogHandler;

impl MessageHandler for LogHandler {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<()>> {
        info!(
            channel = %message.channel,
            subtopic = %message.subtopic,
            publisher = %message.publisher,
            protocol = %message.protocol,
            created = ?message.created_at(),
            bytes = message.payload.len(),
            payload = %String::from_utf8_lossy(&message.payload),
            "Message"
        );
        Box::pin(async { Ok(()) })
    }

    fn cancel(&self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let messaging = config.messaging;

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

    let address = match messaging.messaging_type {
        bus::MessagingType::Amqp => messaging.amqp.url.clone(),
        bus::MessagingType::Channel => "in-process".to_string(),
    };
    let pubsub = connect_with_retry("broker", &address, || bus::connect(&messaging)).await?;
    let pubsub = Instrumented::new(pubsub, messaging.messaging_type.as_str());

    pubsub
        .subscribe(SubscriberConfig::new(TAP_ID, &topic, Arc::new(LogHandler)))
        .await?;

    info!(topic = %topic, prefix = %messaging.prefix, "fluxbus-tap started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    pubsub.close().await?;
    Ok(())
}

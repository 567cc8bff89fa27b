//! Domain event publishing.
//!
//! Services emit domain events as JSON objects on a dedicated stream topic,
//! reusing the regular `Publisher`. Each event gets an `occurred_at` field
//! (Unix nanoseconds) before it is encoded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::bus::{BusError, Publisher, Result};
use crate::message::Message;

/// Prefix of the default per-service event stream.
pub const EVENTS_STREAM_PREFIX: &str = "events";

/// Field added to every event with its occurrence time.
pub const OCCURRED_AT_FIELD: &str = "occurred_at";

/// Protocol tag stamped on event messages.
pub const EVENT_PROTOCOL: &str = "json";

/// Publishes JSON-encoded domain events through a `Publisher`.
pub struct EventPublisher<P> {
    publisher: P,
    service: String,
    stream: String,
}

impl<P: Publisher> EventPublisher<P> {
    /// Publish on the default stream, `events.<service>`.
    pub fn new(publisher: P, service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            stream: format!("{}.{}", EVENTS_STREAM_PREFIX, service),
            publisher,
            service,
        }
    }

    /// Publish on a custom stream topic instead.
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Encode `event` and publish it on the stream.
    pub async fn publish<E: Serialize + ?Sized>(&self, event: &E) -> Result<()> {
        let now = Utc::now();
        let message = Message {
            publisher: self.service.clone(),
            protocol: EVENT_PROTOCOL.to_string(),
            payload: encode_event(event, now)?,
            ..Default::default()
        }
        .with_created(now);

        self.publisher.publish(&self.stream, &message).await?;
        debug!(stream = %self.stream, "Published event");
        Ok(())
    }

    /// Close the underlying publisher.
    pub async fn close(&self) -> Result<()> {
        self.publisher.close().await
    }
}

/// Serialise an event to a JSON object carrying `occurred_at`.
///
/// Fails with `BusError::Encode` if the event is not a JSON object.
pub fn encode_event<E: Serialize + ?Sized>(event: &E, occurred_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(event).map_err(|e| BusError::Encode(e.to_string()))?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| BusError::Encode("event must encode to a JSON object".to_string()))?;
    object.insert(
        OCCURRED_AT_FIELD.to_string(),
        Value::from(occurred_at.timestamp_nanos_opt().unwrap_or(i64::MAX)),
    );

    serde_json::to_vec(&value).map_err(|e| BusError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{connect, MessagingConfig, PubSub, SubscriberConfig};
    use crate::test_utils::RecordingHandler;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[derive(Serialize)]
    struct ThingCreated {
        operation: &'static str,
        id: String,
    }

    #[test]
    fn test_encode_event_adds_occurred_at() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = ThingCreated {
            operation: "thing.create",
            id: "t-1".to_string(),
        };

        let bytes = encode_event(&event, at).unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded["operation"], "thing.create");
        assert_eq!(decoded["id"], "t-1");
        assert_eq!(decoded[OCCURRED_AT_FIELD], 1_700_000_000_000_000_000i64);
    }

    #[test]
    fn test_encode_event_rejects_non_objects() {
        let result = encode_event(&vec![1, 2, 3], Utc::now());
        assert!(matches!(result, Err(BusError::Encode(_))));
    }

    #[tokio::test]
    async fn test_event_publisher_round_trip() {
        let pubsub = Arc::new(connect(&MessagingConfig::channel()).await.unwrap());
        let (handler, mut recording) = RecordingHandler::new();
        pubsub
            .subscribe(SubscriberConfig::new("audit", "events", Arc::new(handler)))
            .await
            .unwrap();

        let events = EventPublisher::new(Arc::clone(&pubsub), "things");
        assert_eq!(events.stream(), "events.things");

        events
            .publish(&ThingCreated {
                operation: "thing.create",
                id: "t-9".to_string(),
            })
            .await
            .unwrap();

        let message = recording.next().await.expect("event delivered");
        assert_eq!(message.publisher, "things");
        assert_eq!(message.protocol, EVENT_PROTOCOL);
        assert!(message.created_at().is_some());

        let body: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body["id"], "t-9");
        assert!(body[OCCURRED_AT_FIELD].is_i64());

        events.close().await.unwrap();
    }
}

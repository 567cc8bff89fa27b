//! fluxbus - topic-based publish/subscribe for IoT protocol adapters
//!
//! Protocol adapters (CoAP, MQTT, HTTP, WebSocket) publish telemetry and
//! services subscribe to message streams through the `bus::PubSub` surface,
//! without depending on a specific broker's wire protocol.

pub mod advice;
pub mod bus;
pub mod config;
pub mod events;
pub mod message;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

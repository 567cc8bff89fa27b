//! Message envelope and its wire codec.
//!
//! The envelope is a protobuf message so adapters written in other languages
//! can decode what the broker carries. Field numbers are part of the wire
//! contract and must never be reused.

use chrono::{DateTime, TimeZone, Utc};
use prost::Message as _;

use crate::bus::{BusError, Result};

/// Unit of data flowing through the bus.
///
/// Every field is optional on the wire; absent strings decode as empty and an
/// absent payload decodes as an empty byte vector.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    /// Channel the message is routed to.
    #[prost(string, tag = "1")]
    pub channel: String,
    /// Finer routing qualifier inside the channel.
    #[prost(string, tag = "2")]
    pub subtopic: String,
    /// Identity of the publishing thing or service.
    #[prost(string, tag = "3")]
    pub publisher: String,
    /// Originating transport (`coap`, `mqtt`, `http`, `ws`, ...).
    #[prost(string, tag = "4")]
    pub protocol: String,
    /// Opaque payload.
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
    /// Creation time in Unix nanoseconds.
    #[prost(int64, tag = "6")]
    pub created: i64,
}

impl Message {
    /// Stamp `created` with the given instant.
    pub fn with_created(mut self, at: DateTime<Utc>) -> Self {
        self.created = at.timestamp_nanos_opt().unwrap_or(i64::MAX);
        self
    }

    /// Stamp `created` with the current time.
    pub fn created_now(self) -> Self {
        self.with_created(Utc::now())
    }

    /// `created` as a timestamp, if one was set.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.created == 0 {
            return None;
        }
        Some(Utc.timestamp_nanos(self.created))
    }
}

/// Encode a message into its envelope bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decode envelope bytes back into a message.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    Message::decode(bytes).map_err(BusError::from)
}

//! Aspect-oriented advice for cross-cutting concerns.
//!
//! This module provides wrapper types that add orthogonal behavior
//! (tracing, timing) without polluting the pub/sub implementation.
//!
//! # Architecture
//!
//! Advice is applied at service composition time, not in implementations:
//!
//! ```ignore
//! // Core implementation
//! let pubsub = bus::connect(&config.messaging).await?;
//!
//! // Apply advice layers
//! let pubsub = Instrumented::new(pubsub, "amqp");
//!
//! // Use as normal - spans and timings are transparent
//! pubsub.publish("orders", &message).await?;
//! ```
//!
//! # Available Advice
//!
//! - [`Instrumented`] - Records a span, latency and outcome for every call

mod instrumented;

pub use instrumented::Instrumented;

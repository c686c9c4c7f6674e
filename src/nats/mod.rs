//! NATS transport adapter
//!
//! Feeds step events from a JetStream durable consumer into the
//! [`TrackingService`](crate::service::TrackingService), one at a time, and
//! acknowledges each only after it has been processed.

pub mod consumer;

pub use consumer::{handle_payload, ConsumerConfig, Disposition, EventConsumer};

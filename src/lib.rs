//! Waypoint - journey tracking indexer
//!
//! Consumes step events describing trackers moving through the steps of a
//! flow, and keeps one search document per tracker with its data, step
//! timings, and step history.
//!
//! ## Components
//!
//! - **Model**: inbound events, admission gate, tracked documents
//! - **Timing**: step timing derivation, ordered by timestamp
//! - **Aggregator**: folds one event into a document
//! - **Store**: cache-then-index resolution and per-application index setup
//! - **Cache**: write-back buffer with debounced bulk flush and retry
//! - **Index**: backing search index (Elasticsearch or in-memory)
//! - **NATS**: JetStream consumer feeding the service

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod index;
pub mod model;
pub mod nats;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod timing;
pub mod types;

pub use config::Args;
pub use service::{ProcessOutcome, ServiceConfig, TrackingService};
pub use types::{Result, TrackerError};

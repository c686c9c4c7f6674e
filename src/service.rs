//! Tracking service - the per-event pipeline
//!
//! ```text
//! StepEvent ─▶ admit ─▶ ensure index ─▶ resolve ─▶ merge ─▶ record
//!                 │                        │                   │
//!              dropped               cache / index        maybe flush
//! ```
//!
//! Events are handled one at a time. The service owns all mutable state
//! (write-back cache, index readiness), so each instance is independent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::aggregator;
use crate::cache::{BulkPersister, CacheStats, FlushReport, WriteBackCache, WriteBackConfig};
use crate::index::{DocumentIndex, IndexSchema};
use crate::model::{Rejection, StepEvent, TrackedDocument};
use crate::store::DocumentStore;
use crate::types::Result;

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Index names are `{index_prefix}_{application}`
    pub index_prefix: String,
    pub schema: IndexSchema,
    pub cache: WriteBackConfig,
    /// Fixed wait between bulk write attempts
    pub retry_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            index_prefix: "journeys".to_string(),
            schema: IndexSchema::default(),
            cache: WriteBackConfig::default(),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What happened to one event
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Refused by the admission gate, nothing changed
    Rejected(Rejection),
    /// Merged and buffered; `flush` is set if this event triggered one
    Buffered { flush: Option<FlushReport> },
}

pub struct TrackingService {
    store: DocumentStore,
    cache: WriteBackCache,
}

impl TrackingService {
    pub fn new(index: Arc<dyn DocumentIndex>, config: ServiceConfig, shutdown: watch::Receiver<bool>) -> Self {
        let persister = BulkPersister::new(
            Arc::clone(&index),
            config.index_prefix.clone(),
            config.retry_delay,
            shutdown,
        );

        Self {
            store: DocumentStore::new(index, config.index_prefix, config.schema),
            cache: WriteBackCache::new(persister, config.cache),
        }
    }

    /// Process one event to completion.
    ///
    /// Rejected events return `Ok`. `TrackerError::Cancelled` means the
    /// event was merged and buffered but the flush it triggered was cut
    /// short by shutdown; it stays pending for the final flush. Any other
    /// error means the event was not applied and can be redelivered.
    pub async fn process(&mut self, event: StepEvent) -> Result<ProcessOutcome> {
        let event = match event.admit() {
            Ok(event) => event,
            Err(rejection) => {
                debug!(reason = %rejection, "Event rejected");
                return Ok(ProcessOutcome::Rejected(rejection));
            }
        };

        self.store.ensure_index(&event.application).await?;

        let document = self.store.resolve(&event, &self.cache).await?;
        let document = aggregator::merge(document, &event, Utc::now());

        let flush = self.cache.record(event.tracker_id, document).await?;

        Ok(ProcessOutcome::Buffered { flush })
    }

    /// Flush buffered documents if the debounce window is open.
    pub async fn flush_idle(&mut self) -> Result<Option<FlushReport>> {
        self.cache.flush_if_armed().await
    }

    /// Flush buffered documents regardless of the debounce window.
    pub async fn flush_now(&mut self) -> Result<FlushReport> {
        self.cache.flush().await
    }

    /// Cached document for a tracker, if it is in the read-through cache
    pub fn cached(&self, tracker_id: &str) -> Option<&TrackedDocument> {
        self.cache.get(tracker_id).map(|doc| doc.as_ref())
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

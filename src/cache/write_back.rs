//! Write-back cache
//!
//! Holds the latest merged document per tracker in two maps:
//!
//! - `items`: read-through cache consulted before the index, entries expire
//!   `cache_ttl` after their last update
//! - `pending`: documents changed since the last flush, latest state only
//!
//! ## Flush trigger
//!
//! Every `record` checks whether to flush. A flush runs when the debounce
//! window is open, or when `items` has reached `overflow_threshold` entries.
//! After a flush the window closes for `flush_debounce`. So a burst flushes
//! at most once per window, unless cardinality forces it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::persister::BulkPersister;
use crate::model::TrackedDocument;
use crate::types::Result;

/// Configuration for the write-back cache
#[derive(Debug, Clone)]
pub struct WriteBackConfig {
    /// How long an `items` entry survives without an update
    pub cache_ttl: Duration,
    /// Closed window after each flush
    pub flush_debounce: Duration,
    /// `items` size that forces a flush inside the window
    pub overflow_threshold: usize,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            flush_debounce: Duration::from_secs(3),
            overflow_threshold: 1000,
        }
    }
}

/// Result of a flush
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    /// Documents written
    pub flushed: usize,
    /// `items` entries dropped as stale before writing
    pub evicted: usize,
    /// Bulk attempts it took
    pub attempts: u32,
    pub duration_ms: f64,
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub items: usize,
    pub pending: usize,
    pub flush_armed: bool,
}

pub struct WriteBackCache {
    items: HashMap<String, Arc<TrackedDocument>>,
    pending: HashMap<String, Arc<TrackedDocument>>,
    /// End of the current debounce window; `None` before the first flush
    rearm_at: Option<Instant>,
    persister: BulkPersister,
    config: WriteBackConfig,
}

impl WriteBackCache {
    pub fn new(persister: BulkPersister, config: WriteBackConfig) -> Self {
        Self {
            items: HashMap::new(),
            pending: HashMap::new(),
            rearm_at: None,
            persister,
            config,
        }
    }

    /// Cached document for a tracker
    pub fn get(&self, tracker_id: &str) -> Option<&Arc<TrackedDocument>> {
        self.items.get(tracker_id)
    }

    /// Whether the debounce window is open
    pub fn flush_armed(&self) -> bool {
        self.rearm_at.map_or(true, |at| Instant::now() >= at)
    }

    fn should_flush(&self) -> bool {
        self.flush_armed() || self.items.len() >= self.config.overflow_threshold
    }

    /// Buffer the latest state of a tracker's document and flush if due.
    pub async fn record(
        &mut self,
        tracker_id: String,
        document: TrackedDocument,
    ) -> Result<Option<FlushReport>> {
        let document = Arc::new(document);
        self.items.insert(tracker_id.clone(), Arc::clone(&document));
        self.pending.insert(tracker_id, document);

        if !self.should_flush() {
            return Ok(None);
        }

        self.flush().await.map(Some)
    }

    /// Flush pending documents if the window is open and anything is pending.
    ///
    /// Lets the tail of a burst reach the index when no further event arrives.
    pub async fn flush_if_armed(&mut self) -> Result<Option<FlushReport>> {
        if self.pending.is_empty() || !self.flush_armed() {
            return Ok(None);
        }

        self.flush().await.map(Some)
    }

    /// Evict stale items, write all pending documents, close the window.
    ///
    /// `pending` is cleared only after the bulk write succeeded.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        let start = std::time::Instant::now();

        let evicted = self.evict_stale(Utc::now());
        let attempts = self.persister.persist(&self.pending).await?;
        let flushed = self.pending.len();
        self.pending.clear();

        self.rearm_at = Some(Instant::now() + self.config.flush_debounce);

        let report = FlushReport {
            flushed,
            evicted,
            attempts,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        if attempts > 1 {
            info!(
                flushed = report.flushed,
                attempts = report.attempts,
                duration_ms = report.duration_ms,
                "Flush completed after retries"
            );
        } else {
            debug!(
                flushed = report.flushed,
                evicted = report.evicted,
                items = self.items.len(),
                "Flush completed"
            );
        }

        Ok(report)
    }

    /// Drop `items` entries last updated more than `cache_ttl` before `now`.
    ///
    /// `pending` is left alone. Returns the number evicted.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let ttl_ms = i64::try_from(self.config.cache_ttl.as_millis()).unwrap_or(i64::MAX);
        let min_updated = now - chrono::Duration::milliseconds(ttl_ms);

        let before = self.items.len();
        self.items.retain(|_, doc| doc.updated_at >= min_updated);
        before - self.items.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items: self.items.len(),
            pending: self.pending.len(),
            flush_armed: self.flush_armed(),
        }
    }
}

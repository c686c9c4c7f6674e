//! Document store
//!
//! Resolves a tracker id to its current document: the write-back cache
//! first, then the application's index, else a fresh document. Also makes
//! sure each application's index exists before its first lookup.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::WriteBackCache;
use crate::index::{DocumentIndex, IndexSchema};
use crate::model::document::{index_name, UNDEFINED};
use crate::model::{AdmittedEvent, TrackedDocument};
use crate::types::Result;

pub struct DocumentStore {
    index: Arc<dyn DocumentIndex>,
    index_prefix: String,
    schema: IndexSchema,
    /// Applications whose index is known to exist
    ready: HashSet<String>,
}

impl DocumentStore {
    pub fn new(index: Arc<dyn DocumentIndex>, index_prefix: impl Into<String>, schema: IndexSchema) -> Self {
        Self {
            index,
            index_prefix: index_prefix.into(),
            schema,
            ready: HashSet::new(),
        }
    }

    /// Index name for an application
    pub fn index_for(&self, application: &str) -> String {
        index_name(&self.index_prefix, application)
    }

    pub fn is_ready(&self, application: &str) -> bool {
        self.ready.contains(application)
    }

    /// Create the application's index if it does not exist yet.
    ///
    /// Checked at most once per application for the life of the store; a
    /// failed check is not remembered and runs again on the next event.
    pub async fn ensure_index(&mut self, application: &str) -> Result<()> {
        if self.ready.contains(application) {
            return Ok(());
        }

        let index = self.index_for(application);

        if !self.index.index_exists(&index).await? {
            info!(index = %index, "Index not found, creating");
            self.index.create_index(&index, &self.schema).await?;
            info!(index = %index, shards = self.schema.shards, replicas = self.schema.replicas, "Index created");
        }

        info!(application = application, index = %index, "Index initialized");
        self.ready.insert(application.to_string());
        Ok(())
    }

    /// Current document for the event's tracker.
    ///
    /// Does not put anything into the cache; the caller records the merged
    /// result. A failed index read is returned as an error rather than
    /// treated as "not found", so an existing journey is never replaced by
    /// a fresh document.
    pub async fn resolve(&self, event: &AdmittedEvent, cache: &WriteBackCache) -> Result<TrackedDocument> {
        if let Some(cached) = cache.get(&event.tracker_id) {
            debug!(tracker_id = %event.tracker_id, "Cache hit");
            return Ok(TrackedDocument::clone(cached));
        }

        let index = self.index_for(&event.application);

        let stored = self
            .index
            .get_document(&index, &event.tracker_id)
            .await
            .inspect_err(|e| {
                warn!(tracker_id = %event.tracker_id, index = %index, error = %e, "Document lookup failed");
            })?;

        match stored {
            Some(document) => {
                debug!(tracker_id = %event.tracker_id, "Loaded document from index");
                Ok(document)
            }
            None => {
                debug!(tracker_id = %event.tracker_id, "New tracker");
                let created_at = event.step.as_ref().map_or_else(Utc::now, |step| step.date);
                Ok(TrackedDocument::new(
                    event.application.clone(),
                    event.flow.clone().unwrap_or_else(|| UNDEFINED.to_string()),
                    created_at,
                ))
            }
        }
    }
}

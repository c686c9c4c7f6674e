//! Bulk persister
//!
//! Writes a pending set to the index as one bulk request. A failed request is
//! retried with the identical payload after a fixed delay, with no attempt
//! limit. Only shutdown interrupts the wait between attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::index::{BulkUpsert, DocumentIndex};
use crate::model::document::index_name;
use crate::model::TrackedDocument;
use crate::shutdown;
use crate::types::{Result, TrackerError};

pub struct BulkPersister {
    index: Arc<dyn DocumentIndex>,
    index_prefix: String,
    retry_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BulkPersister {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        index_prefix: impl Into<String>,
        retry_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            index,
            index_prefix: index_prefix.into(),
            retry_delay,
            shutdown,
        }
    }

    /// Upsert every document, keyed by tracker id, into its application's index.
    ///
    /// Returns the number of attempts it took; `0` for an empty set.
    /// Fails only with [`TrackerError::Cancelled`] when shutdown arrives
    /// while waiting to retry.
    pub async fn persist(&self, documents: &HashMap<String, Arc<TrackedDocument>>) -> Result<u32> {
        if documents.is_empty() {
            return Ok(0);
        }

        let operations: Vec<BulkUpsert<'_>> = documents
            .iter()
            .map(|(id, doc)| BulkUpsert {
                index: index_name(&self.index_prefix, &doc.application),
                id: id.as_str(),
                document: doc.as_ref(),
            })
            .collect();

        let mut shutdown_rx = self.shutdown.clone();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.index.bulk_upsert(&operations).await {
                Ok(()) => {
                    debug!(count = operations.len(), attempt = attempt, "Bulk write committed");
                    return Ok(attempt);
                }
                Err(e) => {
                    error!(
                        count = operations.len(),
                        attempt = attempt,
                        error = %e,
                        "Error saving bulk, retrying"
                    );
                }
            }

            if shutdown::is_requested(&shutdown_rx) {
                warn!(count = operations.len(), "Shutdown requested, abandoning bulk retry");
                return Err(TrackerError::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown::requested(&mut shutdown_rx) => {
                    warn!(count = operations.len(), "Shutdown requested, abandoning bulk retry");
                    return Err(TrackerError::Cancelled);
                }
            }
        }
    }
}

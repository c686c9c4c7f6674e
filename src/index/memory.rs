//! In-memory document index
//!
//! Process-local stand-in for the search cluster. Used by `--index-backend
//! memory` and by tests, which also use its call counters and failure
//! injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::RwLock;
use tracing::warn;

use super::{BulkUpsert, DocumentIndex, IndexSchema};
use crate::model::TrackedDocument;
use crate::types::{Result, TrackerError};

/// Number of calls made against an [`InMemoryIndex`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCallCounts {
    pub exists_checks: usize,
    pub creates: usize,
    pub gets: usize,
    /// Bulk attempts, failed ones included
    pub bulk_writes: usize,
}

/// In-memory document index
#[derive(Default)]
pub struct InMemoryIndex {
    /// index name -> schema it was created with
    indexes: RwLock<HashMap<String, IndexSchema>>,
    /// index name -> id -> document
    documents: RwLock<HashMap<String, HashMap<String, TrackedDocument>>>,
    /// (index, id) pairs of every bulk attempt, in order
    bulk_log: RwLock<Vec<Vec<(String, String)>>>,
    exists_checks: AtomicUsize,
    creates: AtomicUsize,
    gets: AtomicUsize,
    bulk_writes: AtomicUsize,
    failing_bulk_writes: AtomicUsize,
    failing_reads: AtomicBool,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` bulk writes fail
    pub fn fail_next_bulk_writes(&self, count: usize) {
        self.failing_bulk_writes.store(count, Ordering::SeqCst);
    }

    /// Make existence checks and gets fail until turned off
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Seed a stored document
    pub async fn insert(&self, index: &str, id: &str, document: TrackedDocument) {
        self.documents
            .write()
            .await
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    /// Read a stored document without counting it as a get
    pub async fn stored(&self, index: &str, id: &str) -> Option<TrackedDocument> {
        self.documents
            .read()
            .await
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Number of documents stored across all indexes
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.values().map(HashMap::len).sum()
    }

    /// Schema an index was created with, if it was created through this index
    pub async fn schema_of(&self, index: &str) -> Option<IndexSchema> {
        self.indexes.read().await.get(index).copied()
    }

    /// `(index, id)` pairs of every bulk attempt so far
    pub async fn bulk_log(&self) -> Vec<Vec<(String, String)>> {
        self.bulk_log.read().await.clone()
    }

    pub fn call_counts(&self) -> IndexCallCounts {
        IndexCallCounts {
            exists_checks: self.exists_checks.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            bulk_writes: self.bulk_writes.load(Ordering::SeqCst),
        }
    }

    fn check_reads(&self) -> Result<()> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(TrackerError::Index("injected read failure".into()));
        }
        Ok(())
    }

    /// Consume one injected bulk failure, if any are left
    fn take_bulk_failure(&self) -> bool {
        self.failing_bulk_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl DocumentIndex for InMemoryIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        Ok(self.indexes.read().await.contains_key(index)
            || self.documents.read().await.contains_key(index))
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.indexes.write().await.insert(index.to_string(), *schema);
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<TrackedDocument>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        Ok(self.stored(index, id).await)
    }

    async fn bulk_upsert(&self, operations: &[BulkUpsert<'_>]) -> Result<()> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        self.bulk_log.write().await.push(
            operations
                .iter()
                .map(|op| (op.index.clone(), op.id.to_string()))
                .collect(),
        );

        if self.take_bulk_failure() {
            warn!(count = operations.len(), "Injected bulk write failure");
            return Err(TrackerError::Index("injected bulk failure".into()));
        }

        let mut documents = self.documents.write().await;
        for op in operations {
            documents
                .entry(op.index.clone())
                .or_default()
                .insert(op.id.to_string(), op.document.clone());
        }

        Ok(())
    }
}

//! Search index layer
//!
//! The backing store is reached only through [`DocumentIndex`]. Two
//! implementations ship with the crate:
//!
//! - [`ElasticIndex`]: Elasticsearch over its REST API
//! - [`InMemoryIndex`]: process-local, for development runs and tests

pub mod elastic;
pub mod memory;
pub mod schema;

pub use elastic::{ElasticConfig, ElasticIndex};
pub use memory::InMemoryIndex;
pub use schema::IndexSchema;

use crate::model::TrackedDocument;
use crate::types::Result;

/// One create-or-replace in a bulk request
#[derive(Debug, Clone)]
pub struct BulkUpsert<'a> {
    /// Target index (partition) name
    pub index: String,
    /// Document id (the tracker id)
    pub id: &'a str,
    pub document: &'a TrackedDocument,
}

/// Trait for the backing search index (allows mocking in tests)
#[async_trait::async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Check whether an index exists
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index with the given schema
    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()>;

    /// Fetch a stored document by id, `None` if it does not exist
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<TrackedDocument>>;

    /// Create or replace many documents in one request.
    ///
    /// Succeeds only if every operation succeeded.
    async fn bulk_upsert(&self, operations: &[BulkUpsert<'_>]) -> Result<()>;
}

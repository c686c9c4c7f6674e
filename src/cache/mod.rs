//! Write-back caching for tracked documents
//!
//! - [`write_back`]: pending/items maps, TTL eviction, debounced flush trigger
//! - [`persister`]: bulk write of the pending set with retry until success

pub mod persister;
pub mod write_back;

pub use persister::BulkPersister;
pub use write_back::{CacheStats, FlushReport, WriteBackCache, WriteBackConfig};

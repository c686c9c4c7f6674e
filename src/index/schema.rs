//! Index settings and field mapping

use serde_json::{json, Value as JsonValue};

/// Fixed schema applied when an application's index is first created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSchema {
    pub shards: u32,
    pub replicas: u32,
}

impl Default for IndexSchema {
    fn default() -> Self {
        Self {
            shards: 3,
            replicas: 1,
        }
    }
}

impl IndexSchema {
    /// Request body for index creation.
    ///
    /// `data` and `steps` stay dynamic: their keys come from producers.
    pub fn to_body(&self) -> JsonValue {
        json!({
            "settings": {
                "number_of_shards": self.shards,
                "number_of_replicas": self.replicas
            },
            "mappings": {
                "properties": {
                    "application": { "type": "keyword" },
                    "flow": { "type": "keyword" },
                    "data": { "type": "object", "dynamic": true },
                    "steps": { "type": "object", "dynamic": true },
                    "step_logs": {
                        "properties": {
                            "name": { "type": "keyword" },
                            "date": { "type": "date" }
                        }
                    },
                    "created_at": { "type": "date" },
                    "updated_at": { "type": "date" },
                    "synced": { "type": "boolean" }
                }
            }
        })
    }
}

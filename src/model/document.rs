//! Tracked document types
//!
//! One `TrackedDocument` exists per tracker id. It is what gets written to the
//! search index, so the serde field names are the on-index field names.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::event::EventStep;

/// Flow/application value used when an event does not carry one
pub const UNDEFINED: &str = "undefined";

/// Derived timing for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    /// When the step was first reached
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub time: DateTime<Utc>,

    /// Milliseconds since the chronologically first step
    #[serde(default)]
    pub from_start: i64,

    /// Milliseconds since the chronologically previous step
    #[serde(default)]
    pub from_prev: i64,
}

impl StepTiming {
    /// A timing that has not been through the step time processor yet
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            time,
            from_start: 0,
            from_prev: 0,
        }
    }
}

/// The cumulative journey of one tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDocument {
    /// Logical namespace; also selects the index partition
    pub application: String,

    /// Journey type
    pub flow: String,

    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub created_at: DateTime<Utc>,

    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,

    /// Kept for index compatibility. Every merge writes `false`.
    #[serde(default)]
    pub synced: bool,

    #[serde(default)]
    pub data: Map<String, JsonValue>,

    /// One entry per distinct step name ever seen
    #[serde(default)]
    pub steps: HashMap<String, StepTiming>,

    /// Every step snapshot in arrival order, `None` for events without a step
    #[serde(default)]
    pub step_logs: Vec<Option<EventStep>>,
}

impl TrackedDocument {
    /// Create an empty document for a tracker seen for the first time
    pub fn new(
        application: impl Into<String>,
        flow: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            application: application.into(),
            flow: flow.into(),
            created_at,
            updated_at: Utc::now(),
            synced: false,
            data: Map::new(),
            steps: HashMap::new(),
            step_logs: Vec::new(),
        }
    }
}

/// Index partition holding documents of one application
pub fn index_name(prefix: &str, application: &str) -> String {
    format!("{}_{}", prefix, application)
}

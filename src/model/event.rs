//! Inbound step events and the admission gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Required length of a tracker id, in characters
pub const TRACKER_ID_LEN: usize = 32;

/// A step reached by a tracker, as sent by producers.
///
/// The same shape is appended verbatim to a document's `step_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStep {
    /// Step name within the flow
    pub name: String,
    /// When the step was reached
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub date: DateTime<Utc>,
}

impl EventStep {
    pub fn new(name: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }
}

/// Raw event as it arrives on the transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepEvent {
    #[serde(default)]
    pub application: Option<String>,

    #[serde(default, alias = "trackerId")]
    pub tracker_id: Option<String>,

    #[serde(default)]
    pub flow: Option<String>,

    /// Free-form payload, shallow-merged into the document
    #[serde(default)]
    pub data: Option<Map<String, JsonValue>>,

    #[serde(default)]
    pub step: Option<EventStep>,
}

/// Why an event was refused at the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Missing, empty, or not `[a-z0-9_]+`
    InvalidApplication,
    /// Missing or not exactly 32 characters
    InvalidTrackerId,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidApplication => write!(f, "invalid application identifier"),
            Rejection::InvalidTrackerId => write!(f, "invalid tracker id"),
        }
    }
}

/// An event that passed the admission gate
#[derive(Debug, Clone)]
pub struct AdmittedEvent {
    pub application: String,
    pub tracker_id: String,
    pub flow: Option<String>,
    pub data: Option<Map<String, JsonValue>>,
    pub step: Option<EventStep>,
}

impl StepEvent {
    /// Apply the admission gate.
    ///
    /// This is the only validation in the pipeline; anything it refuses is
    /// dropped by the caller without touching a document.
    pub fn admit(self) -> Result<AdmittedEvent, Rejection> {
        let application = match self.application {
            Some(app) if is_valid_application(&app) => app,
            _ => return Err(Rejection::InvalidApplication),
        };

        let tracker_id = match self.tracker_id {
            Some(id) if id.chars().count() == TRACKER_ID_LEN => id,
            _ => return Err(Rejection::InvalidTrackerId),
        };

        Ok(AdmittedEvent {
            application,
            tracker_id,
            flow: self.flow,
            data: self.data,
            step: self.step,
        })
    }
}

/// Lowercase ASCII alphanumerics and underscore, at least one character
fn is_valid_application(application: &str) -> bool {
    !application.is_empty()
        && application
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

//! Wire types: inbound step events and the per-tracker document

pub mod document;
pub mod event;
pub mod timestamp;

pub use document::{StepTiming, TrackedDocument};
pub use event::{AdmittedEvent, EventStep, Rejection, StepEvent, TRACKER_ID_LEN};

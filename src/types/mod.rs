//! Shared types for Waypoint

pub mod error;

pub use error::{Result, TrackerError};

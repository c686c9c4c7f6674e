//! Error types for Waypoint

/// Main error type for Waypoint operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Index error: {0}")]
    Index(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Whether redelivering the triggering message could succeed later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Index(_) | Self::Nats(_) | Self::Cancelled)
    }
}

// Implement From conversions for common error types

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Index(format!("HTTP error: {}", err))
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for TrackerError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for Waypoint operations
pub type Result<T> = std::result::Result<T, TrackerError>;

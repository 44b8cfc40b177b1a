//! Error types for the tabulator
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while tabulating dashboards
#[derive(Debug, Error)]
pub enum TabulatorError {
    /// Invalid service or dashboard configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Object does not exist in the content store
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("Precondition failed for {path}: current generation {current}")]
    PreconditionFailed { path: String, current: u64 },

    /// Path could not be resolved, or resolved outside its bucket
    #[error("Invalid path: {0}")]
    Path(String),

    /// Any other content store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payload could not be decompressed or decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Row filter options could not be parsed
    #[error("Filter error: {0}")]
    Filter(String),

    /// Dashboard is not part of the current configuration
    #[error("Dashboard not found: {0}")]
    DashboardNotFound(String),

    /// Dashboard has no schedule record in the queue
    #[error("Dashboard not queued: {0}")]
    NotQueued(String),

    /// Dispatch channel closed while sending
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Work stopped because its cancellation token fired
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TabulatorError {
    /// True when the error means the object simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        match self {
            TabulatorError::NotFound(_) => true,
            TabulatorError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TabulatorError::Cancelled)
    }
}

/// Result type alias for tabulator operations
pub type Result<T> = std::result::Result<T, TabulatorError>;

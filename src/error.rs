//! ==============================================================================
//! error.rs - library error type
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     one error enum for the link, the stores and the snapshot file.
//!     the binary wraps these in anyhow where only context matters.
//! ```
//!
//! ==============================================================================

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, HostError>;

/// Host error types
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or payload encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Link could not be opened or was lost
    #[error("Link error: {0}")]
    Link(String),

    /// Primary store rejected or failed a request
    #[error("Primary store error: {0}")]
    Primary(String),

    /// Primary store is not configured or not reachable
    #[error("Primary store unavailable")]
    PrimaryUnavailable,

    /// Operation did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for HostError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            HostError::PrimaryUnavailable
        } else {
            HostError::Primary(e.to_string())
        }
    }
}

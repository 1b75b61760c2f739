//! Error types for the plant core library

use thiserror::Error;

use crate::episode::PlantPhase;

/// Core error type for plant operations
///
/// Rail hits are not errors: they end the episode through
/// [`Termination::RailHit`](crate::Termination::RailHit).
#[derive(Error, Debug)]
pub enum PlantError {
    /// The handshake with the low-level interface did not complete in time
    #[error("Connection timeout: no state received from {endpoint} within {timeout_secs}s")]
    ConnectionTimeout {
        /// Endpoint that stayed silent
        endpoint: String,
        /// Allotted time in seconds
        timeout_secs: f64,
    },

    /// Malformed state message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Action out of range or of the wrong kind
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Non-finite dynamics output
    #[error("Integration error: {0}")]
    Integration(String),

    /// The hardware link has been closed
    #[error("Link closed")]
    Closed,

    /// `step` was called without a preceding `reset`
    #[error("Reset required: plant is {0:?}")]
    ResetRequired(PlantPhase),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for plant operations
pub type Result<T> = std::result::Result<T, PlantError>;

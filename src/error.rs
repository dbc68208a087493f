//! Error types
//!
//! Errors travel two ways in this crate: as the payload of an `Error`
//! event fanned out to listeners, and as the `Err` returned to the
//! emitting caller when nobody is left observing that event. Both paths
//! share one `Clone`-able type.

use std::fmt;

/// Convenience alias for fallible operations in this crate
pub type Result<T> = std::result::Result<T, StreamError>;

/// Error carried by `Error` events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The underlying transport or resource failed
    Io(String),
    /// The destination rejected data or failed to flush
    Write(String),
    /// A stream was used after it finished
    Finalized,
    /// Collaborator-defined failure
    Other(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Io(msg) => write!(f, "I/O failure: {}", msg),
            StreamError::Write(msg) => write!(f, "write failed: {}", msg),
            StreamError::Finalized => write!(f, "stream used after finalization"),
            StreamError::Other(msg) => write!(f, "stream error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

//! Error types for the sync engine.

use finsync_sync_protocol::{ApiResponse, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed request or response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server did not accept the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server refused the request as invalid (4xx other than 401).
    #[error("rejected by server ({status}): {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Public error message.
        message: String,
        /// Per-field problems.
        details: Vec<String>,
    },

    /// The server failed (5xx).
    #[error("server error ({status}): {message}")]
    ServerError {
        /// HTTP status.
        status: u16,
        /// Public error message.
        message: String,
    },

    /// Local replica I/O failure.
    #[error("replica I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local replica snapshot could not be encoded or decoded.
    #[error("replica snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted operation.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classifies a non-2xx response.
    pub fn from_response(response: &ApiResponse) -> Self {
        let (message, details) = match response.error_body() {
            Some(body) => (body.error, body.details),
            None => (format!("HTTP {}", response.status), Vec::new()),
        };
        match response.status {
            401 => Self::Unauthorized(message),
            status if status >= 500 => Self::ServerError { status, message },
            status => Self::Rejected {
                status,
                message,
                details,
            },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError { .. } => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

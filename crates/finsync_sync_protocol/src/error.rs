//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON for the expected message.
    #[error("malformed body: {0}")]
    Json(#[from] serde_json::Error),

    /// The message decoded but violates the protocol's rules.
    #[error("invalid input: {}", .details.join("; "))]
    Invalid {
        /// One entry per problem found.
        details: Vec<String>,
    },

    /// A query string parameter is malformed.
    #[error("invalid query parameter {name}: {message}")]
    Query {
        /// Parameter name.
        name: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid-input error with a single detail.
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::Invalid {
            details: vec![detail.into()],
        }
    }

    /// Returns the individual problems, for the `details` field of an error body.
    #[must_use]
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::Invalid { details } => details.clone(),
            other => vec![other.to_string()],
        }
    }
}

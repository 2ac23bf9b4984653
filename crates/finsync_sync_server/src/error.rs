//! Error types for the sync server.

use finsync_core::CoreError;
use finsync_sync_protocol::{ApiResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No principal could be resolved from the request.
    #[error("unauthorized")]
    Unauthorized,

    /// The request is malformed. Nothing was applied.
    #[error("invalid input: {message}")]
    Validation {
        /// Summary.
        message: String,
        /// One entry per problem.
        details: Vec<String>,
    },

    /// A record targeted by a direct operation does not exist.
    #[error("{what} not found")]
    NotFound {
        /// What was looked for.
        what: String,
    },

    /// The store failed. Safe to retry the whole call.
    #[error("storage failure: {0}")]
    StorageFailure(#[source] CoreError),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a validation error with a single detail.
    pub fn validation(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::Validation {
            message: detail.clone(),
            details: vec![detail],
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns true if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::Validation { .. } | Self::NotFound { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::StorageFailure(_) | Self::Internal(_))
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::StorageFailure(_) | Self::Internal(_) => 500,
        }
    }

    /// The message shown to the caller. Server-side failures never expose
    /// their cause.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::Validation { .. } => "Invalid input".to_string(),
            Self::NotFound { what } => format!("{what} not found"),
            Self::StorageFailure(_) | Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Renders the error as a response body.
    #[must_use]
    pub fn to_response(&self) -> ApiResponse {
        let details = match self {
            Self::Validation { details, .. } => details.clone(),
            _ => Vec::new(),
        };
        ApiResponse::error(self.status_code(), self.public_message(), details)
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidOperation { message } => Self::Internal(message),
            other => Self::StorageFailure(other),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Validation {
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::Unauthorized.is_client_error());
        assert!(ServerError::validation("bad").is_client_error());
        assert!(ServerError::not_found("Loan").is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::validation("bad").is_server_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ServerError::Unauthorized.status_code(), 401);
        assert_eq!(ServerError::validation("x").status_code(), 400);
        assert_eq!(ServerError::not_found("Loan").status_code(), 404);
        assert_eq!(
            ServerError::from(CoreError::StoreLocked).status_code(),
            500
        );
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let err = ServerError::from(CoreError::journal_corruption(42, "secret path /var/db"));
        let body = err.to_response().error_body().unwrap();
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_empty());
    }

    #[test]
    fn protocol_errors_become_validation() {
        let err = ServerError::from(ProtocolError::Invalid {
            details: vec!["a".into(), "b".into()],
        });
        let response = err.to_response();
        assert_eq!(response.status, 400);
        assert_eq!(response.error_body().unwrap().details, vec!["a", "b"]);
    }

    #[test]
    fn not_found_message() {
        let err = ServerError::not_found("Payment");
        assert_eq!(err.public_message(), "Payment not found");
    }
}

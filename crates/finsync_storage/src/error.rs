//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by journal backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to grow the log through `truncate`.
    #[error("cannot truncate to {requested} bytes, log holds {len}")]
    TruncateBeyondEnd {
        /// The requested length.
        requested: u64,
        /// The current length.
        len: u64,
    },

    /// The log is larger than this platform can buffer.
    #[error("log of {size} bytes does not fit in memory")]
    TooLarge {
        /// Size of the log.
        size: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_names_both_lengths() {
        let err = StorageError::TruncateBeyondEnd {
            requested: 10,
            len: 4,
        };
        assert_eq!(err.to_string(), "cannot truncate to 10 bytes, log holds 4");
    }

    #[test]
    fn io_errors_convert() {
        let err: StorageError = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}

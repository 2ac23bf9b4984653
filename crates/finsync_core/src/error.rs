//! Error types for finsync core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the record stores and the journal.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] finsync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal entry could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal is corrupted.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a journal frame.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Byte offset of the frame.
        offset: u64,
        /// Checksum stored in the frame header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Invalid store layout.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp: {value:?}")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
    },

    /// Operation not permitted for the given arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid timestamp error.
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error means the persisted data cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. } | Self::Codec { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_message_is_hex() {
        let err = CoreError::ChecksumMismatch {
            offset: 12,
            expected: 0xDEAD_BEEF,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch at offset 12: expected deadbeef, got 00000001"
        );
    }

    #[test]
    fn corruption_classification() {
        assert!(CoreError::journal_corruption(0, "bad").is_corruption());
        assert!(CoreError::codec("bad cbor").is_corruption());
        assert!(!CoreError::StoreLocked.is_corruption());
        assert!(!CoreError::invalid_timestamp("yesterday").is_corruption());
    }
}

//! Journal backend trait.

use crate::error::StorageResult;

/// How far an append must travel before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Handed to the OS; survives a process crash but not power loss.
    #[default]
    Buffered,
    /// Fsynced before returning.
    Synced,
}

/// The byte log under a record journal.
///
/// A backend holds one growing run of bytes. The journal appends a frame
/// per mutation, reads the whole run back on open, cuts a torn frame off
/// the tail, and occasionally swaps the run for a compacted one. Backends
/// never interpret the bytes.
///
/// # Invariants
///
/// - `append` returns the length before the append, which is where the
///   frame starts
/// - `len` always equals the number of bytes `read_all` would return
/// - `truncate` and `replace` are durable when they return
/// - a crash during `replace` leaves either the old or the new bytes
pub trait StorageBackend: Send + Sync {
    /// Number of bytes held.
    fn len(&self) -> u64;

    /// Returns `true` when nothing has been appended.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads every byte held.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or [`crate::StorageError::TooLarge`] if the
    /// log does not fit in memory.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends one frame and returns its starting offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write (or the fsync) fails.
    fn append(&mut self, frame: &[u8], durability: Durability) -> StorageResult<u64>;

    /// Cuts the log back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `len` is
    /// larger than the log, or an I/O error.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Replaces the whole log with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written. The old
    /// contents are intact in that case.
    fn replace(&mut self, contents: &[u8]) -> StorageResult<()>;
}

pub(crate) fn buffer_len(size: u64) -> crate::StorageResult<usize> {
    usize::try_from(size).map_err(|_| crate::StorageError::TooLarge { size })
}

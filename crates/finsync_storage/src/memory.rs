//! In-memory journal backend.

use crate::backend::{Durability, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// A journal held in memory.
///
/// Clones share one buffer. A test can keep a clone after handing the
/// backend to a store, then inspect or damage the bytes the store wrote.
///
/// # Example
///
/// ```rust
/// use finsync_storage::{Durability, InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"frame", Durability::Synced).unwrap();
/// assert_eq!(observer.bytes(), b"frame");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<Mutex<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding a captured journal, torn tail and all.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Copy of the current bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Appends raw bytes without going through a store, to simulate a
    /// frame torn by a crash.
    pub fn corrupt_tail(&self, garbage: &[u8]) {
        self.data.lock().extend_from_slice(garbage);
    }
}

impl StorageBackend for InMemoryBackend {
    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.bytes())
    }

    fn append(&mut self, frame: &[u8], _durability: Durability) -> StorageResult<u64> {
        let mut data = self.data.lock();
        let offset = data.len() as u64;
        data.extend_from_slice(frame);
        Ok(offset)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let mut data = self.data.lock();
        let current = data.len() as u64;
        if len > current {
            return Err(StorageError::TruncateBeyondEnd {
                requested: len,
                len: current,
            });
        }
        data.truncate(crate::backend::buffer_len(len)?);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StorageResult<()> {
        *self.data.lock() = contents.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_appends() {
        let mut backend = InMemoryBackend::new();
        let observer = backend.clone();

        assert_eq!(backend.append(b"first", Durability::Buffered).unwrap(), 0);
        assert_eq!(backend.append(b"second", Durability::Synced).unwrap(), 5);
        assert_eq!(observer.len(), 11);
        assert_eq!(observer.bytes(), b"firstsecond");
    }

    #[test]
    fn corrupted_tail_is_visible_then_truncated() {
        let mut backend = InMemoryBackend::with_data(b"frame".to_vec());
        backend.corrupt_tail(&[0xFF, 0x00]);
        assert_eq!(backend.len(), 7);

        backend.truncate(5).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"frame");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd {
                requested: 100,
                len: 5
            })
        ));
    }

    #[test]
    fn replace_discards_old_bytes() {
        let mut backend = InMemoryBackend::with_data(b"old old old".to_vec());
        backend.replace(b"new").unwrap();
        assert_eq!(backend.bytes(), b"new");
        assert!(!backend.is_empty());
    }
}

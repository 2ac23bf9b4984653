//! # finsync storage
//!
//! Append-only byte stores that back the finsync record journal.
//!
//! Backends are **opaque**: they never look inside the frames the journal
//! writes. The journal layer in `finsync_core` owns framing, checksums and
//! replay. A backend remembers bytes in arrival order, cuts off a torn
//! tail, and swaps in compacted contents atomically.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway servers
//! - [`FileBackend`] - a single journal file on disk
//!
//! ## Example
//!
//! ```rust
//! use finsync_storage::{Durability, InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"put:t1;", Durability::Buffered).unwrap();
//! backend.append(b"put:t1;", Durability::Synced).unwrap();
//! backend.replace(b"put:t1;").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"put:t1;");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{Durability, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

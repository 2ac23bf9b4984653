//! Store directory management.
//!
//! On-disk layout of a journaled store:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! └─ journal.log       # Framed CBOR journal of every mutation
//! ```
//!
//! Compaction stages `journal.log.tmp` and renames it over `journal.log`.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";

/// Manages the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time, across processes.
///
/// # Example
///
/// ```rust,no_run
/// use finsync_core::StoreDir;
/// use std::path::Path;
///
/// let dir = StoreDir::open(Path::new("finsync-data"), true)?;
/// println!("journal: {:?}", dir.journal_path());
/// # Ok::<(), finsync_core::CoreError>(())
/// ```
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (`StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        Self::journal_path_in(&self.path)
    }

    /// Journal path inside `dir`, for read-only tools that don't take the lock.
    #[must_use]
    pub fn journal_path_in(dir: &Path) -> PathBuf {
        dir.join(JOURNAL_FILE)
    }
}

//! Single-file journal backend.

use crate::backend::{buffer_len, Durability, StorageBackend};
use crate::error::{StorageError, StorageResult};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal kept in one append-mode file.
///
/// A failed append cuts the file back to the last whole frame, so a short
/// write (a full disk, say) never leaves garbage in front of later frames.
///
/// `replace` writes a sibling `<name>.tmp`, fsyncs it, renames it over the
/// journal and fsyncs the parent directory.
///
/// # Example
///
/// ```no_run
/// use finsync_storage::{Durability, FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("journal.log")).unwrap();
/// backend.append(b"frame", Durability::Synced).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    log: AppendLog<File>,
}

/// What the append path needs from the file under it.
trait JournalFile: Write {
    fn cut(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self, durability: Durability) -> io::Result<()>;
}

impl JournalFile for File {
    fn cut(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self, durability: Durability) -> io::Result<()> {
        match durability {
            Durability::Buffered => self.flush(),
            Durability::Synced => self.sync_data(),
        }
    }
}

/// Length bookkeeping over an append-only file.
#[derive(Debug)]
struct AppendLog<F> {
    file: F,
    len: u64,
    /// A failed append could not be cut back; bytes past `len` are garbage.
    dirty: bool,
}

impl<F: JournalFile> AppendLog<F> {
    fn new(file: F, len: u64) -> Self {
        Self {
            file,
            len,
            dirty: false,
        }
    }

    fn append(&mut self, frame: &[u8], durability: Durability) -> StorageResult<u64> {
        let offset = self.len;
        if self.dirty {
            self.file.cut(offset)?;
            self.dirty = false;
        }

        let written = self
            .file
            .write_all(frame)
            .and_then(|()| self.file.sync(durability));
        if let Err(err) = written {
            self.dirty = self.file.cut(offset).is_err();
            return Err(err.into());
        }

        self.len += frame.len() as u64;
        Ok(offset)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len > self.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: len,
                len: self.len,
            });
        }
        self.file.cut(len)?;
        self.file.sync(Durability::Synced)?;
        self.len = len;
        self.dirty = false;
        Ok(())
    }
}

fn open_for_append(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl FileBackend {
    /// Opens the journal at `path`, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = open_for_append(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            log: AppendLog::new(file, len),
        })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path `replace` stages new contents at.
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("journal"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn len(&self) -> u64 {
        self.log.len
    }

    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(buffer_len(self.log.len)?);
        let mut file = &self.log.file;
        file.seek(SeekFrom::Start(0))?;
        file.take(self.log.len).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, frame: &[u8], durability: Durability) -> StorageResult<u64> {
        self.log.append(frame, durability)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.log.truncate(len)
    }

    fn replace(&mut self, contents: &[u8]) -> StorageResult<()> {
        let staging = self.staging_path();
        {
            let mut tmp = File::create(&staging)?;
            tmp.write_all(contents)?;
            tmp.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        sync_parent(&self.path)?;

        self.log = AppendLog::new(open_for_append(&self.path)?, contents.len() as u64);
        Ok(())
    }
}

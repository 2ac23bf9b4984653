//! Journaled store.
//!
//! Every mutation is appended to a journal before it is applied in memory.
//! Opening the store replays the journal.
//!
//! ## Frame format
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────┐
//! │ len (4 LE)   │ crc32 (4 LE) │ CBOR entry (len)    │
//! └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! A frame that runs past the end of the journal is a torn write from a
//! crash and is truncated away on open. A complete frame whose checksum
//! does not match is corruption and fails the open.

use super::dir::StoreDir;
use super::memory::MemoryStore;
use super::{EntityStore, Presence, StoreStats, Tombstone, TombstoneLog};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::types::{Cursor, RecordId, RecordType, Timestamp, UserId};
use finsync_storage::{Durability, FileBackend, StorageBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const FRAME_HEADER_SIZE: usize = 8;

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Full-record upsert.
    Put {
        /// Partition owner.
        user: UserId,
        /// The stored record.
        record: Record,
    },
    /// Soft delete of a live row.
    SoftDelete {
        /// Partition owner.
        user: UserId,
        /// Record type.
        record_type: RecordType,
        /// Deleted ID.
        id: RecordId,
    },
    /// Tombstone upsert.
    Tombstone(Tombstone),
    /// Tombstone pruning up to a horizon.
    Prune {
        /// Tombstones deleted before this instant were dropped.
        horizon: Timestamp,
    },
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { user, record } => write!(
                f,
                "PUT {user} {}/{} updatedAt={}",
                record.record_type(),
                record.id(),
                record.updated_at()
            ),
            Self::SoftDelete {
                user,
                record_type,
                id,
            } => write!(f, "SOFT_DELETE {user} {record_type}/{id}"),
            Self::Tombstone(t) => write!(
                f,
                "TOMBSTONE {} {}/{} deletedAt={}",
                t.user_id, t.record_type, t.record_id, t.deleted_at
            ),
            Self::Prune { horizon } => write!(f, "PRUNE before {horizon}"),
        }
    }
}

/// Result of reading a journal from start to end.
#[derive(Debug, Clone, Default)]
pub struct JournalScan {
    /// Decoded entries, in append order.
    pub entries: Vec<JournalEntry>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Bytes after the intact prefix belonging to a torn frame.
    pub torn_bytes: u64,
}

/// Encodes one entry as a frame.
fn encode_frame(entry: &JournalEntry, out: &mut Vec<u8>) -> CoreResult<()> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(entry, &mut payload)
        .map_err(|e| CoreError::codec(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec(format!("entry too large: {} bytes", payload.len())))?;

    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Reads every frame in `bytes`.
///
/// # Errors
///
/// Returns `ChecksumMismatch` or a codec error for a complete but bad frame.
pub(crate) fn scan_bytes(bytes: &[u8]) -> CoreResult<JournalScan> {
    let mut scan = JournalScan::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let expected = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let Some(payload) = rest.get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len) else {
            break;
        };

        let actual = crc32(payload);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch {
                offset: offset as u64,
                expected,
                actual,
            });
        }
        let entry: JournalEntry = ciborium::de::from_reader(payload).map_err(|e| {
            CoreError::journal_corruption(offset as u64, format!("undecodable entry: {e}"))
        })?;

        scan.entries.push(entry);
        offset += FRAME_HEADER_SIZE + len;
    }

    scan.valid_len = offset as u64;
    scan.torn_bytes = (bytes.len() - offset) as u64;
    Ok(scan)
}

/// CRC32 (IEEE polynomial).
fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

struct JournalWriter {
    backend: Box<dyn StorageBackend>,
    durability: Durability,
}

impl JournalWriter {
    fn append(&mut self, entry: &JournalEntry) -> CoreResult<()> {
        let mut frame = Vec::new();
        encode_frame(entry, &mut frame)?;
        self.backend.append(&frame, self.durability)?;
        Ok(())
    }
}

/// Outcome of [`JournaledStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
    /// Entries in the rewritten journal.
    pub entries: usize,
}

/// Crash-recoverable Entity Store and Tombstone Log.
///
/// State lives in a [`MemoryStore`]; every mutation is first appended to
/// the journal. Writes are serialized by the journal lock, so journal order
/// and in-memory order always agree.
///
/// # Example
///
/// ```rust,no_run
/// use finsync_core::{JournaledStore, StoreConfig};
/// use std::path::Path;
///
/// let store = JournaledStore::open(Path::new("finsync-data"), &StoreConfig::default())?;
/// println!("{:?}", store.stats());
/// # Ok::<(), finsync_core::CoreError>(())
/// ```
pub struct JournaledStore {
    state: MemoryStore,
    journal: Mutex<JournalWriter>,
    dir: Option<StoreDir>,
}

impl fmt::Debug for JournaledStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournaledStore")
            .field("dir", &self.dir)
            .field("stats", &self.state.stats())
            .finish_non_exhaustive()
    }
}

impl JournaledStore {
    /// Opens the store in `path`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked or missing (and not created), or
    /// the journal is corrupted.
    pub fn open(path: &Path, config: &StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::with_backend(Box::new(backend), config.sync_on_write)?;
        store.dir = Some(dir);
        Ok(store)
    }

    /// Builds a store over any backend, replaying whatever it holds.
    ///
    /// # Errors
    ///
    /// Fails if the journal is corrupted.
    pub fn with_backend(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let scan = scan_bytes(&backend.read_all()?)?;
        if scan.torn_bytes > 0 {
            tracing::warn!(
                torn_bytes = scan.torn_bytes,
                valid_len = scan.valid_len,
                "truncating torn journal tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        let state = MemoryStore::new();
        for entry in &scan.entries {
            state.apply(entry)?;
        }
        tracing::debug!(entries = scan.entries.len(), "journal replayed");

        Ok(Self {
            state,
            journal: Mutex::new(JournalWriter {
                backend,
                durability: if sync_on_write {
                    Durability::Synced
                } else {
                    Durability::Buffered
                },
            }),
            dir: None,
        })
    }

    /// Reads the journal in `path` without locking or repairing it.
    ///
    /// # Errors
    ///
    /// Fails if there is no journal, or it is corrupted.
    pub fn scan_journal(path: &Path) -> CoreResult<JournalScan> {
        let journal = StoreDir::journal_path_in(path);
        if !journal.is_file() {
            return Err(CoreError::invalid_format(format!(
                "no journal at {}",
                journal.display()
            )));
        }
        scan_bytes(&std::fs::read(journal)?)
    }

    /// Returns counts describing the store.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.state.stats()
    }

    /// Current journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the backend.
    pub fn journal_size(&self) -> CoreResult<u64> {
        Ok(self.journal.lock().backend.len())
    }

    /// Rewrites the journal as a snapshot of the current state.
    ///
    /// The backend swaps contents atomically, so a crash leaves either the
    /// old or the new journal.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or renaming fails.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        let mut journal = self.journal.lock();
        let bytes_before = journal.backend.len();

        let entries = self.state.snapshot();
        let mut bytes = Vec::new();
        for entry in &entries {
            encode_frame(entry, &mut bytes)?;
        }

        journal.backend.replace(&bytes)?;

        let report = CompactionReport {
            bytes_before,
            bytes_after: bytes.len() as u64,
            entries: entries.len(),
        };
        tracing::info!(
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            entries = report.entries,
            "journal compacted"
        );
        Ok(report)
    }

    fn write(&self, entry: &JournalEntry) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        journal.append(entry)?;
        self.state.apply(entry)
    }
}

impl EntityStore for JournaledStore {
    fn get(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Option<Record>> {
        self.state.get(user, record_type, id)
    }

    fn presence(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Presence> {
        self.state.presence(user, record_type, id)
    }

    fn put(&self, user: &UserId, record: Record) -> CoreResult<()> {
        if record.user_id() != user {
            return Err(CoreError::invalid_operation(format!(
                "record {} does not belong to user {user}",
                record.id()
            )));
        }
        self.write(&JournalEntry::Put {
            user: user.clone(),
            record,
        })
    }

    fn soft_delete(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<bool> {
        let mut journal = self.journal.lock();
        if !self.state.has_live_row(user, record_type, id) {
            return Ok(false);
        }
        journal.append(&JournalEntry::SoftDelete {
            user: user.clone(),
            record_type,
            id: id.clone(),
        })?;
        Ok(self.state.apply_soft_delete(user, record_type, id))
    }

    fn scan_since(
        &self,
        user: &UserId,
        record_type: RecordType,
        cursor: Cursor,
    ) -> CoreResult<Vec<Record>> {
        self.state.scan_since(user, record_type, cursor)
    }

    fn list_live(&self, user: &UserId, record_type: RecordType) -> CoreResult<Vec<Record>> {
        self.state.list_live(user, record_type)
    }
}

impl TombstoneLog for JournaledStore {
    fn record(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
        deleted_at: Timestamp,
    ) -> CoreResult<()> {
        self.write(&JournalEntry::Tombstone(Tombstone {
            user_id: user.clone(),
            record_type,
            record_id: id.clone(),
            deleted_at,
        }))
    }

    fn since(
        &self,
        user: &UserId,
        record_type: RecordType,
        cursor: Cursor,
    ) -> CoreResult<Vec<RecordId>> {
        self.state.since(user, record_type, cursor)
    }

    fn tombstone(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Option<Tombstone>> {
        self.state.tombstone(user, record_type, id)
    }

    fn prune_before(&self, horizon: Timestamp) -> CoreResult<usize> {
        let mut journal = self.journal.lock();
        journal.append(&JournalEntry::Prune { horizon })?;
        self.state.prune_before(horizon)
    }

    fn pruned_through(&self) -> CoreResult<Option<Timestamp>> {
        self.state.pruned_through()
    }
}

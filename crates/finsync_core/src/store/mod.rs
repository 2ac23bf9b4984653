//! Entity Store and Tombstone Log.
//!
//! Records are partitioned by `(user, record type)`. The contracts here are
//! the only way the sync server touches storage:
//!
//! - [`EntityStore`]: point reads, full-record upserts, soft deletes, and a
//!   range scan by `updatedAt` that feeds the delta extractor.
//! - [`TombstoneLog`]: one tombstone per deleted key, upserted, scanned by
//!   `deletedAt`, pruned by retention.
//!
//! [`MemoryStore`] implements both in memory; [`JournaledStore`] adds a
//! crash-recoverable journal on a [`finsync_storage::StorageBackend`].

mod dir;
mod journal;
mod memory;

pub use dir::StoreDir;
pub use journal::{CompactionReport, JournalEntry, JournalScan, JournaledStore};
pub use memory::MemoryStore;

use crate::error::CoreResult;
use crate::record::Record;
use crate::types::{Cursor, RecordId, RecordType, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Whether a key currently names a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// A live record is stored under the key.
    Live,
    /// The key was deleted: its row is soft-deleted or it has a tombstone.
    Deleted,
    /// Nothing was ever stored under the key.
    Absent,
}

/// A durable marker recording that a record was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Owner of the deleted record.
    pub user_id: UserId,
    /// Type of the deleted record.
    pub record_type: RecordType,
    /// ID of the deleted record.
    pub record_id: RecordId,
    /// When the (latest) delete happened.
    pub deleted_at: Timestamp,
}

/// Per-user record storage with soft deletion.
pub trait EntityStore: Send + Sync {
    /// Returns the live record stored under the key, if any.
    ///
    /// Soft-deleted and tombstoned records are reported as absent.
    fn get(&self, user: &UserId, record_type: RecordType, id: &RecordId)
        -> CoreResult<Option<Record>>;

    /// Classifies the key as live, deleted or never seen.
    fn presence(&self, user: &UserId, record_type: RecordType, id: &RecordId)
        -> CoreResult<Presence>;

    /// Upserts the full record under its ID.
    ///
    /// Starts a new lifecycle episode if the key was deleted: the row
    /// becomes live and its tombstone is cleared. Conflict resolution is the
    /// caller's job; the store simply overwrites.
    fn put(&self, user: &UserId, record: Record) -> CoreResult<()>;

    /// Marks the record absent without erasing it.
    ///
    /// Idempotent. Returns true if a live row was hidden.
    fn soft_delete(&self, user: &UserId, record_type: RecordType, id: &RecordId)
        -> CoreResult<bool>;

    /// Live records with `updatedAt > cursor`, ordered by `updatedAt` then ID.
    fn scan_since(&self, user: &UserId, record_type: RecordType, cursor: Cursor)
        -> CoreResult<Vec<Record>>;

    /// All live records of a type, ordered by `updatedAt` then ID.
    fn list_live(&self, user: &UserId, record_type: RecordType) -> CoreResult<Vec<Record>>;
}

/// Upserting log of deletions.
pub trait TombstoneLog: Send + Sync {
    /// Records a deletion at `deleted_at`.
    ///
    /// Upserts on `(user, type, id)`: a repeated delete refreshes
    /// `deletedAt` instead of adding a second entry.
    fn record(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
        deleted_at: Timestamp,
    ) -> CoreResult<()>;

    /// IDs tombstoned with `deletedAt > cursor`, ordered by `deletedAt` then ID.
    fn since(&self, user: &UserId, record_type: RecordType, cursor: Cursor)
        -> CoreResult<Vec<RecordId>>;

    /// Returns the tombstone for a key, if one is retained.
    fn tombstone(&self, user: &UserId, record_type: RecordType, id: &RecordId)
        -> CoreResult<Option<Tombstone>>;

    /// Drops every tombstone with `deletedAt < horizon` and raises the
    /// pruning watermark to `horizon`. Returns how many were dropped.
    fn prune_before(&self, horizon: Timestamp) -> CoreResult<usize>;

    /// The highest horizon ever pruned, or `None` if nothing was pruned.
    ///
    /// A cursor below this value may have missed deletions.
    fn pruned_through(&self) -> CoreResult<Option<Timestamp>>;
}

/// A store offering both contracts, as the sync server needs.
pub trait SyncStore: EntityStore + TombstoneLog {}

impl<T: EntityStore + TombstoneLog> SyncStore for T {}

/// Counts describing the contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Users with at least one stored row or tombstone.
    pub users: usize,
    /// Live transactions.
    pub live_transactions: usize,
    /// Live loans.
    pub live_loans: usize,
    /// Soft-deleted rows still kept for history.
    pub deleted_rows: usize,
    /// Retained tombstones.
    pub tombstones: usize,
    /// Pruning watermark.
    pub pruned_through: Option<Timestamp>,
}

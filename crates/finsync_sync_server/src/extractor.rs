//! Delta extraction.
//!
//! Given a cursor, reports everything a client has not seen for one record
//! type: live records with `updatedAt > cursor`, and IDs tombstoned with
//! `deletedAt > cursor`. An ID never lands in both lists; a deletion wins
//! over any live row that still carries a newer stamp.

use finsync_core::{
    CoreResult, Cursor, EntityStore, RecordId, SyncRecord, SyncStore, TombstoneLog, UserId,
};
use finsync_sync_protocol::Delta;
use std::collections::HashSet;

/// Reads deltas out of a [`SyncStore`].
pub struct DeltaExtractor<'a> {
    store: &'a dyn SyncStore,
}

impl<'a> DeltaExtractor<'a> {
    /// Creates an extractor over `store`.
    pub fn new(store: &'a dyn SyncStore) -> Self {
        Self { store }
    }

    /// Returns true if deletions after `cursor` may have been pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot report its pruning watermark.
    pub fn needs_full_resync(&self, cursor: Cursor) -> CoreResult<bool> {
        Ok(matches!(self.store.pruned_through()?, Some(watermark) if cursor < watermark))
    }

    /// Extracts the delta of `T` records for `user` after `cursor`.
    ///
    /// With `full_resync` every live record is returned and no deletions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn delta<T: SyncRecord>(
        &self,
        user: &UserId,
        cursor: Cursor,
        full_resync: bool,
    ) -> CoreResult<Delta<T>> {
        if full_resync {
            let records = self.store.list_live(user, T::RECORD_TYPE)?;
            return Ok(Delta {
                records: records.into_iter().filter_map(T::from_record).collect(),
                deleted: Vec::new(),
            });
        }

        let deleted = self.store.since(user, T::RECORD_TYPE, cursor)?;
        let tombstoned: HashSet<&RecordId> = deleted.iter().collect();
        let records = self
            .store
            .scan_since(user, T::RECORD_TYPE, cursor)?
            .into_iter()
            .filter_map(T::from_record)
            .filter(|record| !tombstoned.contains(record.id()))
            .collect();

        Ok(Delta { records, deleted })
    }
}

//! In-memory Entity Store and Tombstone Log.

use super::journal::JournalEntry;
use super::{EntityStore, Presence, StoreStats, Tombstone, TombstoneLog};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::types::{Cursor, RecordId, RecordType, Timestamp, UserId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct Row {
    record: Record,
    deleted: bool,
}

/// Rows and tombstones of one `(user, record type)` pair.
#[derive(Debug, Default)]
struct Partition {
    rows: BTreeMap<RecordId, Row>,
    /// `(updatedAt, id)` of every live row.
    feed: BTreeSet<(Timestamp, RecordId)>,
    tombstones: BTreeMap<RecordId, Timestamp>,
    /// `(deletedAt, id)` of every tombstone.
    tombstone_feed: BTreeSet<(Timestamp, RecordId)>,
}

impl Partition {
    fn is_live(&self, id: &RecordId) -> bool {
        !self.tombstones.contains_key(id) && self.rows.get(id).is_some_and(|row| !row.deleted)
    }

    fn clear_tombstone(&mut self, id: &RecordId) {
        if let Some(at) = self.tombstones.remove(id) {
            self.tombstone_feed.remove(&(at, id.clone()));
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<UserId, BTreeMap<RecordType, Partition>>,
    pruned_through: Option<Timestamp>,
}

impl Inner {
    fn partition(&self, user: &UserId, record_type: RecordType) -> Option<&Partition> {
        self.users.get(user).and_then(|types| types.get(&record_type))
    }

    fn partition_mut(&mut self, user: &UserId, record_type: RecordType) -> &mut Partition {
        self.users
            .entry(user.clone())
            .or_default()
            .entry(record_type)
            .or_default()
    }
}

/// Entity Store and Tombstone Log held entirely in memory.
///
/// Thread-safe; every operation takes one lock, so each call is atomic.
/// [`super::JournaledStore`] wraps this type and replays its journal into it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one journal entry.
    pub(crate) fn apply(&self, entry: &JournalEntry) -> CoreResult<()> {
        match entry {
            JournalEntry::Put { user, record } => self.apply_put(user, record.clone()),
            JournalEntry::SoftDelete {
                user,
                record_type,
                id,
            } => {
                self.apply_soft_delete(user, *record_type, id);
                Ok(())
            }
            JournalEntry::Tombstone(t) => {
                self.apply_tombstone(&t.user_id, t.record_type, &t.record_id, t.deleted_at);
                Ok(())
            }
            JournalEntry::Prune { horizon } => {
                self.apply_prune(*horizon);
                Ok(())
            }
        }
    }

    fn apply_put(&self, user: &UserId, record: Record) -> CoreResult<()> {
        if record.user_id() != user {
            return Err(CoreError::invalid_operation(format!(
                "record {} belongs to user {:?}, not {user}",
                record.id(),
                record.user_id().as_str()
            )));
        }

        let mut inner = self.inner.write();
        let partition = inner.partition_mut(user, record.record_type());
        let id = record.id().clone();

        if let Some(old) = partition.rows.get(&id) {
            if !old.deleted {
                let old_key = (old.record.updated_at(), id.clone());
                partition.feed.remove(&old_key);
            }
        }
        partition.clear_tombstone(&id);
        partition.feed.insert((record.updated_at(), id.clone()));
        partition.rows.insert(
            id,
            Row {
                record,
                deleted: false,
            },
        );
        Ok(())
    }

    /// Returns true if a live row was hidden.
    pub(crate) fn apply_soft_delete(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> bool {
        let mut inner = self.inner.write();
        let Some(partition) = inner
            .users
            .get_mut(user)
            .and_then(|types| types.get_mut(&record_type))
        else {
            return false;
        };
        let Some(row) = partition.rows.get_mut(id) else {
            return false;
        };
        if row.deleted {
            return false;
        }
        row.deleted = true;
        let key = (row.record.updated_at(), id.clone());
        partition.feed.remove(&key);
        true
    }

    fn apply_tombstone(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
        deleted_at: Timestamp,
    ) {
        let mut inner = self.inner.write();
        let partition = inner.partition_mut(user, record_type);
        partition.clear_tombstone(id);
        partition.tombstones.insert(id.clone(), deleted_at);
        partition.tombstone_feed.insert((deleted_at, id.clone()));
    }

    fn apply_prune(&self, horizon: Timestamp) -> usize {
        let mut inner = self.inner.write();
        let mut dropped = 0;
        for partition in inner.users.values_mut().flat_map(|types| types.values_mut()) {
            let expired: Vec<(Timestamp, RecordId)> = partition
                .tombstone_feed
                .range(..(horizon, RecordId::default()))
                .cloned()
                .collect();
            for key in expired {
                partition.tombstones.remove(&key.1);
                partition.tombstone_feed.remove(&key);
                dropped += 1;
            }
        }
        inner.pruned_through = Some(inner.pruned_through.map_or(horizon, |p| p.max(horizon)));
        dropped
    }

    /// Whether a soft delete of this key would hide a live row.
    pub(crate) fn has_live_row(&self, user: &UserId, record_type: RecordType, id: &RecordId) -> bool {
        self.inner
            .read()
            .partition(user, record_type)
            .and_then(|p| p.rows.get(id))
            .is_some_and(|row| !row.deleted)
    }

    /// Journal entries that rebuild the current state from scratch.
    pub(crate) fn snapshot(&self) -> Vec<JournalEntry> {
        let inner = self.inner.read();
        let mut entries = Vec::new();

        if let Some(horizon) = inner.pruned_through {
            entries.push(JournalEntry::Prune { horizon });
        }
        for (user, types) in &inner.users {
            for (&record_type, partition) in types {
                for (id, row) in &partition.rows {
                    entries.push(JournalEntry::Put {
                        user: user.clone(),
                        record: row.record.clone(),
                    });
                    if row.deleted {
                        entries.push(JournalEntry::SoftDelete {
                            user: user.clone(),
                            record_type,
                            id: id.clone(),
                        });
                    }
                }
                for (id, &deleted_at) in &partition.tombstones {
                    entries.push(JournalEntry::Tombstone(Tombstone {
                        user_id: user.clone(),
                        record_type,
                        record_id: id.clone(),
                        deleted_at,
                    }));
                }
            }
        }
        entries
    }

    /// Returns counts describing the store.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        let mut stats = StoreStats {
            users: inner.users.len(),
            pruned_through: inner.pruned_through,
            ..StoreStats::default()
        };
        for types in inner.users.values() {
            for (record_type, partition) in types {
                let live = partition
                    .rows
                    .keys()
                    .filter(|id| partition.is_live(id))
                    .count();
                match record_type {
                    RecordType::Transaction => stats.live_transactions += live,
                    RecordType::Loan => stats.live_loans += live,
                }
                stats.deleted_rows += partition.rows.values().filter(|r| r.deleted).count();
                stats.tombstones += partition.tombstones.len();
            }
        }
        stats
    }

    fn collect_live(
        &self,
        user: &UserId,
        record_type: RecordType,
        from: Option<Timestamp>,
    ) -> Vec<Record> {
        let inner = self.inner.read();
        let Some(partition) = inner.partition(user, record_type) else {
            return Vec::new();
        };
        let start = from.unwrap_or(Timestamp::from_millis(i64::MIN));
        partition
            .feed
            .range((start, RecordId::default())..)
            .filter(|(_, id)| !partition.tombstones.contains_key(id))
            .filter_map(|(_, id)| partition.rows.get(id))
            .map(|row| row.record.clone())
            .collect()
    }
}

impl EntityStore for MemoryStore {
    fn get(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Option<Record>> {
        let inner = self.inner.read();
        Ok(inner
            .partition(user, record_type)
            .filter(|p| p.is_live(id))
            .and_then(|p| p.rows.get(id))
            .map(|row| row.record.clone()))
    }

    fn presence(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Presence> {
        let inner = self.inner.read();
        let Some(partition) = inner.partition(user, record_type) else {
            return Ok(Presence::Absent);
        };
        Ok(if partition.is_live(id) {
            Presence::Live
        } else if partition.tombstones.contains_key(id) || partition.rows.contains_key(id) {
            Presence::Deleted
        } else {
            Presence::Absent
        })
    }

    fn put(&self, user: &UserId, record: Record) -> CoreResult<()> {
        self.apply_put(user, record)
    }

    fn soft_delete(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<bool> {
        Ok(self.apply_soft_delete(user, record_type, id))
    }

    fn scan_since(
        &self,
        user: &UserId,
        record_type: RecordType,
        cursor: Cursor,
    ) -> CoreResult<Vec<Record>> {
        Ok(self.collect_live(user, record_type, Some(cursor.next())))
    }

    fn list_live(&self, user: &UserId, record_type: RecordType) -> CoreResult<Vec<Record>> {
        Ok(self.collect_live(user, record_type, None))
    }
}

impl TombstoneLog for MemoryStore {
    fn record(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
        deleted_at: Timestamp,
    ) -> CoreResult<()> {
        self.apply_tombstone(user, record_type, id, deleted_at);
        Ok(())
    }

    fn since(
        &self,
        user: &UserId,
        record_type: RecordType,
        cursor: Cursor,
    ) -> CoreResult<Vec<RecordId>> {
        let inner = self.inner.read();
        Ok(inner
            .partition(user, record_type)
            .map(|p| {
                p.tombstone_feed
                    .range((cursor.next(), RecordId::default())..)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn tombstone(
        &self,
        user: &UserId,
        record_type: RecordType,
        id: &RecordId,
    ) -> CoreResult<Option<Tombstone>> {
        let inner = self.inner.read();
        Ok(inner
            .partition(user, record_type)
            .and_then(|p| p.tombstones.get(id))
            .map(|&deleted_at| Tombstone {
                user_id: user.clone(),
                record_type,
                record_id: id.clone(),
                deleted_at,
            }))
    }

    fn prune_before(&self, horizon: Timestamp) -> CoreResult<usize> {
        Ok(self.apply_prune(horizon))
    }

    fn pruned_through(&self) -> CoreResult<Option<Timestamp>> {
        Ok(self.inner.read().pruned_through)
    }
}

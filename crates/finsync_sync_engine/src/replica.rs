//! Local replica: the device's copy of its records plus the changes it has
//! not yet delivered.
//!
//! Every local edit is stamped with a replica-wide revision. A sync sends a
//! snapshot of the pending queue and, when the server answers, clears only
//! the entries whose revision is unchanged, so an edit made while a request
//! was in flight is sent again next time.

use crate::error::SyncResult;
use finsync_core::{Cursor, Loan, Record, RecordId, RecordType, SyncRecord, Timestamp, Transaction};
use finsync_sync_protocol::{ChangeBatch, Delta, SyncRequest, SyncResponse};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How a pending change will be presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Created locally and not edited since.
    New,
    /// Edited locally. The server inserts an edit it has never seen, so
    /// this is also how an edited create travels.
    Updated,
    /// Deleted locally.
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Pending {
    kind: ChangeKind,
    revision: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Collection<T> {
    cursor: Timestamp,
    records: BTreeMap<RecordId, T>,
    pending: BTreeMap<RecordId, Pending>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            cursor: Timestamp::EPOCH,
            records: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }
}

impl<T: SyncRecord> Collection<T> {
    fn create(&mut self, record: T, revision: u64) {
        let id = record.id().clone();
        self.records.insert(id.clone(), record);
        self.pending.insert(
            id,
            Pending {
                kind: ChangeKind::New,
                revision,
            },
        );
    }

    fn update(&mut self, record: T, revision: u64) {
        let id = record.id().clone();
        self.records.insert(id.clone(), record);
        self.pending.insert(
            id,
            Pending {
                kind: ChangeKind::Updated,
                revision,
            },
        );
    }

    fn delete(&mut self, id: &RecordId, revision: u64) -> bool {
        let existed = self.records.remove(id).is_some();
        self.pending.insert(
            id.clone(),
            Pending {
                kind: ChangeKind::Deleted,
                revision,
            },
        );
        existed
    }

    fn batch(&self, record_type: RecordType, sent: &mut Vec<SentChange>) -> ChangeBatch<T> {
        let mut batch = ChangeBatch::default();
        for (id, pending) in &self.pending {
            match pending.kind {
                ChangeKind::New | ChangeKind::Updated => {
                    let Some(record) = self.records.get(id) else {
                        continue;
                    };
                    if pending.kind == ChangeKind::New {
                        batch.new.push(record.clone());
                    } else {
                        batch.updated.push(record.clone());
                    }
                }
                ChangeKind::Deleted => batch.deleted.push(id.clone()),
            }
            sent.push(SentChange {
                record_type,
                id: id.clone(),
                revision: pending.revision,
            });
        }
        batch
    }

    fn acknowledge(&mut self, id: &RecordId, revision: u64) {
        if self.pending.get(id).is_some_and(|p| p.revision == revision) {
            self.pending.remove(id);
        }
    }

    fn merge(&mut self, delta: Delta<T>, sync_timestamp: Timestamp, full_resync: bool) -> MergeSummary {
        let mut summary = MergeSummary::default();

        if full_resync {
            let pending = &self.pending;
            let before = self.records.len();
            self.records.retain(|id, _| pending.contains_key(id));
            summary.removed += before - self.records.len();
        }

        for record in delta.records {
            if self.pending.contains_key(record.id()) {
                summary.kept_local += 1;
                continue;
            }
            self.records.insert(record.id().clone(), record);
            summary.applied += 1;
        }

        for id in &delta.deleted {
            self.pending.remove(id);
            if self.records.remove(id).is_some() {
                summary.removed += 1;
            }
        }

        self.cursor = sync_timestamp;
        summary
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReplicaState {
    revision: u64,
    transactions: Collection<Transaction>,
    loans: Collection<Loan>,
}

impl ReplicaState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn cursor(&self, record_type: RecordType) -> Cursor {
        match record_type {
            RecordType::Transaction => self.transactions.cursor,
            RecordType::Loan => self.loans.cursor,
        }
    }

    fn merge(&mut self, response: &SyncResponse) -> MergeSummary {
        let mut summary = MergeSummary::default();
        if let Some(delta) = response.changes.transactions_delta() {
            summary += self
                .transactions
                .merge(delta, response.sync_timestamp, response.full_resync);
        }
        if let Some(delta) = response.changes.loans_delta() {
            summary += self
                .loans
                .merge(delta, response.sync_timestamp, response.full_resync);
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentChange {
    record_type: RecordType,
    id: RecordId,
    revision: u64,
}

/// A sync request together with the pending revisions it carries.
#[derive(Debug, Clone)]
pub struct PreparedSync {
    /// The body to send.
    pub request: SyncRequest,
    sent: Vec<SentChange>,
}

impl PreparedSync {
    /// Number of records and IDs being pushed.
    pub fn pushed(&self) -> usize {
        self.sent.len()
    }
}

/// What merging a server response did to the replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Server records written locally.
    pub applied: usize,
    /// Local records dropped by server deletions or a full resync.
    pub removed: usize,
    /// Server records ignored because a local edit is pending.
    pub kept_local: usize,
}

impl std::ops::AddAssign for MergeSummary {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.removed += other.removed;
        self.kept_local += other.kept_local;
    }
}

/// The device-side copy of a user's records.
///
/// All reads and writes go through one lock, so merging a server response
/// and advancing the cursor happen together. A replica opened from a path
/// rewrites its JSON snapshot after every change.
///
/// # Example
///
/// ```
/// use finsync_core::{Record, RecordId, RecordType, Transaction};
/// use finsync_sync_engine::LocalReplica;
///
/// let replica = LocalReplica::in_memory();
/// let tx = Transaction::new(RecordId::new("t1"), 500.0, "Food", "2026-01-15");
/// replica.create(Record::Transaction(tx)).unwrap();
///
/// let prepared = replica.prepare_request(&[RecordType::Transaction]);
/// assert_eq!(prepared.pushed(), 1);
/// ```
#[derive(Debug)]
pub struct LocalReplica {
    state: Mutex<ReplicaState>,
    path: Option<PathBuf>,
}

impl LocalReplica {
    /// Creates an empty replica that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(ReplicaState::default()),
            path: None,
        }
    }

    /// Opens the replica snapshot at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a snapshot.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            ReplicaState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    /// Snapshot path, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records a locally created record.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn create(&self, record: Record) -> SyncResult<()> {
        let mut state = self.state.lock();
        let revision = state.next_revision();
        match record {
            Record::Transaction(t) => state.transactions.create(t, revision),
            Record::Loan(l) => state.loans.create(l, revision),
        }
        self.persist(&state)
    }

    /// Records a local edit.
    ///
    /// The edit is always queued as an update. A create may already have
    /// reached the server even if its response never came back, and the
    /// server keeps the first version of a repeated create.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn update(&self, record: Record) -> SyncResult<()> {
        let mut state = self.state.lock();
        let revision = state.next_revision();
        match record {
            Record::Transaction(t) => state.transactions.update(t, revision),
            Record::Loan(l) => state.loans.update(l, revision),
        }
        self.persist(&state)
    }

    /// Records a local delete and returns whether a local copy existed.
    ///
    /// The ID is queued either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn delete(&self, record_type: RecordType, id: &RecordId) -> SyncResult<bool> {
        let mut state = self.state.lock();
        let revision = state.next_revision();
        let existed = match record_type {
            RecordType::Transaction => state.transactions.delete(id, revision),
            RecordType::Loan => state.loans.delete(id, revision),
        };
        self.persist(&state)?;
        Ok(existed)
    }

    /// Returns a local record.
    pub fn get(&self, record_type: RecordType, id: &RecordId) -> Option<Record> {
        let state = self.state.lock();
        match record_type {
            RecordType::Transaction => state
                .transactions
                .records
                .get(id)
                .cloned()
                .map(Record::Transaction),
            RecordType::Loan => state.loans.records.get(id).cloned().map(Record::Loan),
        }
    }

    /// All local transactions, ordered by ID.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().transactions.records.values().cloned().collect()
    }

    /// All local loans, ordered by ID.
    pub fn loans(&self) -> Vec<Loan> {
        self.state.lock().loans.records.values().cloned().collect()
    }

    /// The cursor last received for `record_type`.
    pub fn cursor(&self, record_type: RecordType) -> Cursor {
        self.state.lock().cursor(record_type)
    }

    /// Pending changes of one type, ordered by ID.
    pub fn pending(&self, record_type: RecordType) -> Vec<(RecordId, ChangeKind)> {
        let state = self.state.lock();
        let pending = match record_type {
            RecordType::Transaction => &state.transactions.pending,
            RecordType::Loan => &state.loans.pending,
        };
        pending.iter().map(|(id, p)| (id.clone(), p.kind)).collect()
    }

    /// Total pending changes across types.
    pub fn pending_len(&self) -> usize {
        let state = self.state.lock();
        state.transactions.pending.len() + state.loans.pending.len()
    }

    /// Builds the next sync request for `types`.
    ///
    /// Every type gets a block, even when it has nothing pending, so the
    /// server answers with that type's delta. The cursor is the oldest one
    /// among `types`.
    pub fn prepare_request(&self, types: &[RecordType]) -> PreparedSync {
        let state = self.state.lock();
        let cursor = types
            .iter()
            .map(|rt| state.cursor(*rt))
            .min()
            .unwrap_or(Timestamp::EPOCH);

        let mut request = SyncRequest::new(cursor);
        let mut sent = Vec::new();
        for record_type in types {
            match record_type {
                RecordType::Transaction => {
                    request.changes.transactions =
                        Some(state.transactions.batch(RecordType::Transaction, &mut sent));
                }
                RecordType::Loan => {
                    request.changes.loans = Some(state.loans.batch(RecordType::Loan, &mut sent));
                }
            }
        }
        PreparedSync { request, sent }
    }

    /// Applies a successful sync: clears what was sent and unchanged since,
    /// merges the server delta and advances the cursors.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The in-memory
    /// state is updated regardless.
    pub fn complete_sync(&self, prepared: &PreparedSync, response: &SyncResponse) -> SyncResult<MergeSummary> {
        let mut state = self.state.lock();
        for change in &prepared.sent {
            match change.record_type {
                RecordType::Transaction => state.transactions.acknowledge(&change.id, change.revision),
                RecordType::Loan => state.loans.acknowledge(&change.id, change.revision),
            }
        }
        let summary = state.merge(response);
        self.persist(&state)?;
        Ok(summary)
    }

    /// Applies a pull response. Nothing pending is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn complete_pull(&self, response: &SyncResponse) -> SyncResult<MergeSummary> {
        let mut state = self.state.lock();
        let summary = state.merge(response);
        self.persist(&state)?;
        Ok(summary)
    }

    fn persist(&self, state: &ReplicaState) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let temp = path.with_extension("tmp");
        {
            let mut file = File::create(&temp)?;
            serde_json::to_writer(&mut file, state)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp, path)?;
        Ok(())
    }
}

//! Sync and pull messages.
//!
//! Request:
//!
//! ```text
//! { lastSyncTimestamp, changes: { transactions: {new, updated, deleted}, loans: {...} } }
//! ```
//!
//! Response:
//!
//! ```text
//! { syncTimestamp, changes: { transactions, deletedTransactions, loans, deletedLoans } }
//! ```

use finsync_core::{Loan, RecordId, RecordType, SyncRecord, Timestamp, Transaction};
use serde::{Deserialize, Deserializer, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A missing, `null` or empty cursor means the epoch.
fn cursor_or_epoch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Timestamp::EPOCH),
        Some(raw) if raw.trim().is_empty() => Ok(Timestamp::EPOCH),
        Some(raw) => Timestamp::parse(&raw).map_err(serde::de::Error::custom),
    }
}

/// A client's queued changes for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: SyncRecord"))]
pub struct ChangeBatch<T> {
    /// Records created locally since the last sync.
    #[serde(default)]
    pub new: Vec<T>,
    /// Records edited locally since the last sync.
    #[serde(default)]
    pub updated: Vec<T>,
    /// IDs deleted locally since the last sync.
    #[serde(default)]
    pub deleted: Vec<RecordId>,
}

impl<T> Default for ChangeBatch<T> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T> ChangeBatch<T> {
    /// Number of records and IDs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns true if the batch carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Change blocks keyed by record type. Absent blocks are out of scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientChanges {
    /// Transaction changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<ChangeBatch<Transaction>>,
    /// Loan changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loans: Option<ChangeBatch<Loan>>,
}

impl ClientChanges {
    /// Record types that have a block in this request.
    #[must_use]
    pub fn record_types(&self) -> Vec<RecordType> {
        let mut types = Vec::new();
        if self.transactions.is_some() {
            types.push(RecordType::Transaction);
        }
        if self.loans.is_some() {
            types.push(RecordType::Loan);
        }
        types
    }

    /// Total records and IDs across all blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.as_ref().map_or(0, ChangeBatch::len)
            + self.loans.as_ref().map_or(0, ChangeBatch::len)
    }

    /// Returns true if no block carries anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of `POST /api/sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// The client's cursor. Missing, `null` or `""` means the epoch.
    #[serde(default, deserialize_with = "cursor_or_epoch")]
    pub last_sync_timestamp: Timestamp,
    /// Locally queued changes.
    #[serde(default)]
    pub changes: ClientChanges,
}

impl SyncRequest {
    /// Creates a request with no changes.
    #[must_use]
    pub fn new(last_sync_timestamp: Timestamp) -> Self {
        Self {
            last_sync_timestamp,
            changes: ClientChanges::default(),
        }
    }
}

/// Created-or-updated records and tombstoned IDs of one type.
///
/// An ID never appears in both lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<T> {
    /// Records created or updated after the cursor.
    pub records: Vec<T>,
    /// IDs tombstoned after the cursor.
    pub deleted: Vec<RecordId>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T: SyncRecord> Delta<T> {
    /// Returns true if there is nothing to deliver.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.deleted.is_empty()
    }

    /// Returns true if no ID is both a record and a deletion.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.records
            .iter()
            .all(|r| !self.deleted.contains(r.id()))
    }
}

/// The server's reciprocal delta, one pair of keys per type in scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerChanges {
    /// Transactions created or updated after the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
    /// Transaction IDs tombstoned after the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_transactions: Option<Vec<RecordId>>,
    /// Loans created or updated after the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loans: Option<Vec<Loan>>,
    /// Loan IDs tombstoned after the cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_loans: Option<Vec<RecordId>>,
}

impl ServerChanges {
    /// Sets the transaction keys.
    pub fn set_transactions(&mut self, delta: Delta<Transaction>) {
        self.transactions = Some(delta.records);
        self.deleted_transactions = Some(delta.deleted);
    }

    /// Sets the loan keys.
    pub fn set_loans(&mut self, delta: Delta<Loan>) {
        self.loans = Some(delta.records);
        self.deleted_loans = Some(delta.deleted);
    }

    /// The transaction delta, if transactions were in scope.
    #[must_use]
    pub fn transactions_delta(&self) -> Option<Delta<Transaction>> {
        if self.transactions.is_none() && self.deleted_transactions.is_none() {
            return None;
        }
        Some(Delta {
            records: self.transactions.clone().unwrap_or_default(),
            deleted: self.deleted_transactions.clone().unwrap_or_default(),
        })
    }

    /// The loan delta, if loans were in scope.
    #[must_use]
    pub fn loans_delta(&self) -> Option<Delta<Loan>> {
        if self.loans.is_none() && self.deleted_loans.is_none() {
            return None;
        }
        Some(Delta {
            records: self.loans.clone().unwrap_or_default(),
            deleted: self.deleted_loans.clone().unwrap_or_default(),
        })
    }

    /// Total records and IDs delivered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.as_ref().map_or(0, Vec::len)
            + self.deleted_transactions.as_ref().map_or(0, Vec::len)
            + self.loans.as_ref().map_or(0, Vec::len)
            + self.deleted_loans.as_ref().map_or(0, Vec::len)
    }

    /// Returns true if nothing is delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body returned by `POST /api/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// The client's next cursor, adopted only after merging `changes`.
    pub sync_timestamp: Timestamp,
    /// Everything the client has not seen.
    pub changes: ServerChanges,
    /// The cursor predated tombstone pruning: `changes` lists every live
    /// record and no deletions, and the client must replace its synced
    /// records with them.
    #[serde(default, skip_serializing_if = "is_false")]
    pub full_resync: bool,
}

/// Body returned by the pull-only endpoints, `GET /api/<type>/sync?lastSync=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: SyncRecord"))]
pub struct PullResponse<T> {
    /// Records created or updated after the cursor.
    pub records: Vec<T>,
    /// IDs tombstoned after the cursor.
    pub deleted: Vec<RecordId>,
    /// The client's next cursor.
    pub sync_timestamp: Timestamp,
    /// See [`SyncResponse::full_resync`].
    #[serde(default, skip_serializing_if = "is_false")]
    pub full_resync: bool,
}

impl<T> PullResponse<T> {
    /// Builds the response from an extracted delta.
    #[must_use]
    pub fn from_delta(delta: Delta<T>, sync_timestamp: Timestamp, full_resync: bool) -> Self {
        Self {
            records: delta.records,
            deleted: delta.deleted,
            sync_timestamp,
            full_resync,
        }
    }
}

//! The Reconciler.
//!
//! One call applies a client's batch and answers with everything the
//! client has not seen:
//!
//! 1. **Creates**: inserted only if the ID was never stored. A live ID
//!    keeps its first writer's values; a deleted ID is never reused.
//! 2. **Updates**: overwrite the stored record unconditionally. An ID that
//!    was never stored is inserted; a deleted ID stays deleted. When a
//!    batch updates one ID twice, the later entry is the one applied.
//! 3. **Deletes**: soft delete plus tombstone, applied last so a create
//!    and delete of one ID in the same batch ends deleted.
//! 4. **Extraction** with the client's old cursor, minus the versions
//!    this call wrote itself.
//!
//! Every accepted write is stamped with the server clock, and the returned
//! `syncTimestamp` is taken after the last write. A batch is validated as
//! a whole before the first write, and each step is idempotent, so a
//! retried call leaves the store as a single call would.

use crate::auth::Principal;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::extractor::DeltaExtractor;
use finsync_core::{
    amortization, Clock, Cursor, EntityStore, Presence, Record, RecordId, RecordType, SyncRecord,
    SyncStore, Timestamp, TombstoneLog, UserId,
};
use finsync_sync_protocol::{
    validate_sync_request, ChangeBatch, Delta, ServerChanges, SyncRequest, SyncResponse,
};
use std::collections::HashMap;

/// What this call left stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Record(Timestamp),
    Tombstone(Timestamp),
}

/// Counters for one reconcile call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Records inserted from `new` or misclassified `updated` entries.
    pub inserted: usize,
    /// Stored records overwritten.
    pub updated: usize,
    /// Deletions recorded.
    pub deleted: usize,
    /// Entries that changed nothing.
    pub skipped: usize,
}

/// Applies client batches to a [`SyncStore`].
pub struct Reconciler<'a> {
    store: &'a dyn SyncStore,
    clock: &'a dyn Clock,
    config: &'a ServerConfig,
    written: HashMap<(RecordType, RecordId), Written>,
    stats: ReconcileStats,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler for one call.
    pub fn new(store: &'a dyn SyncStore, clock: &'a dyn Clock, config: &'a ServerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            written: HashMap::new(),
            stats: ReconcileStats::default(),
        }
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Runs one sync call for `principal`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] if the batch is malformed, too large
    ///   or names a record type this server does not sync. Nothing is
    ///   applied.
    /// - [`ServerError::StorageFailure`] if the store fails. Writes made
    ///   before the failure stay; retrying the whole call is safe.
    pub fn reconcile(
        &mut self,
        principal: &Principal,
        request: SyncRequest,
    ) -> ServerResult<SyncResponse> {
        let types = self.types_in_scope(&request)?;
        validate_sync_request(&request, self.config.max_batch_records)?;

        let user = &principal.user_id;
        let cursor = request.last_sync_timestamp;
        let SyncRequest { changes, .. } = request;
        let mut transactions = changes.transactions.unwrap_or_default();
        let mut loans = changes.loans.unwrap_or_default();

        for tx in &mut transactions.new {
            tx.month_key = amortization::month_key(&tx.date).unwrap_or_default();
        }
        for tx in &mut transactions.updated {
            tx.month_key = amortization::month_key(&tx.date).unwrap_or_default();
        }

        self.apply_creates(user, std::mem::take(&mut transactions.new))?;
        self.apply_creates(user, std::mem::take(&mut loans.new))?;
        self.apply_updates(user, std::mem::take(&mut transactions.updated))?;
        self.apply_updates(user, std::mem::take(&mut loans.updated))?;
        self.apply_deletes(user, &transactions)?;
        self.apply_deletes(user, &loans)?;

        let sync_timestamp = self.clock.now();
        let extractor = DeltaExtractor::new(self.store);
        let full_resync = extractor.needs_full_resync(cursor)?;

        let mut response_changes = ServerChanges::default();
        for record_type in types {
            match record_type {
                RecordType::Transaction => {
                    let delta = self.extract(&extractor, user, cursor, full_resync)?;
                    response_changes.set_transactions(delta);
                }
                RecordType::Loan => {
                    let delta = self.extract(&extractor, user, cursor, full_resync)?;
                    response_changes.set_loans(delta);
                }
            }
        }

        tracing::info!(
            user = %user,
            cursor = %cursor,
            sync_timestamp = %sync_timestamp,
            inserted = self.stats.inserted,
            updated = self.stats.updated,
            deleted = self.stats.deleted,
            skipped = self.stats.skipped,
            delivered = response_changes.len(),
            full_resync,
            "sync reconciled"
        );

        Ok(SyncResponse {
            sync_timestamp,
            changes: response_changes,
            full_resync,
        })
    }

    fn types_in_scope(&self, request: &SyncRequest) -> ServerResult<Vec<RecordType>> {
        let requested = request.changes.record_types();
        if requested.is_empty() {
            return Ok(self.config.record_types.clone());
        }
        let disabled: Vec<String> = requested
            .iter()
            .filter(|t| !self.config.syncs(**t))
            .map(|t| format!("changes.{} is not synced by this server", t.collection()))
            .collect();
        if !disabled.is_empty() {
            return Err(ServerError::Validation {
                message: "unsupported record type".to_string(),
                details: disabled,
            });
        }
        Ok(requested)
    }

    fn apply_creates<T: SyncRecord>(&mut self, user: &UserId, records: Vec<T>) -> ServerResult<()> {
        let kind = T::RECORD_TYPE;
        for record in records {
            let mut record = record.into_record();
            record.set_user_id(user.clone());

            match self.store.presence(user, kind, record.id())? {
                Presence::Absent => self.insert(user, record)?,
                Presence::Live => {
                    tracing::debug!(id = %record.id(), kind = %kind, "create of live id skipped");
                    self.stats.skipped += 1;
                }
                Presence::Deleted => {
                    tracing::debug!(id = %record.id(), kind = %kind, "create of deleted id dropped");
                    self.stats.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn apply_updates<T: SyncRecord>(&mut self, user: &UserId, records: Vec<T>) -> ServerResult<()> {
        let kind = T::RECORD_TYPE;
        // Only the last update of an ID in one batch survives.
        let last: HashMap<RecordId, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id().clone(), i))
            .collect();

        for (i, record) in records.into_iter().enumerate() {
            if last.get(record.id()) != Some(&i) {
                self.stats.skipped += 1;
                continue;
            }
            let mut record = record.into_record();
            record.set_user_id(user.clone());

            let Some(stored) = self.store.get(user, kind, record.id())? else {
                if self.store.presence(user, kind, record.id())? == Presence::Deleted {
                    tracing::debug!(id = %record.id(), kind = %kind, "update of deleted id dropped");
                    self.stats.skipped += 1;
                } else {
                    self.insert(user, record)?;
                }
                continue;
            };

            if let (Record::Loan(incoming), Record::Loan(old)) = (&mut record, &stored) {
                incoming.absorb_paid_ledger(old);
            }
            if record.same_content(&stored) {
                tracing::debug!(id = %record.id(), kind = %kind, "unchanged update skipped");
                self.stats.skipped += 1;
                continue;
            }

            let now = self.clock.now();
            record.set_stamps(stored.created_at(), now);
            let key = (kind, record.id().clone());
            self.store.put(user, record)?;
            self.written.insert(key, Written::Record(now));
            self.stats.updated += 1;
        }
        Ok(())
    }

    fn apply_deletes<T: SyncRecord>(&mut self, user: &UserId, batch: &ChangeBatch<T>) -> ServerResult<()> {
        let kind = T::RECORD_TYPE;
        for id in &batch.deleted {
            let hidden = self.store.soft_delete(user, kind, id)?;
            if !hidden && self.store.tombstone(user, kind, id)?.is_some() {
                tracing::debug!(id = %id, kind = %kind, "repeated delete skipped");
                self.stats.skipped += 1;
                continue;
            }
            let now = self.clock.now();
            self.store.record(user, kind, id, now)?;
            self.written
                .insert((kind, id.clone()), Written::Tombstone(now));
            self.stats.deleted += 1;
        }
        Ok(())
    }

    fn insert(&mut self, user: &UserId, mut record: Record) -> ServerResult<()> {
        let now = self.clock.now();
        record.set_stamps(record.created_at(), now);
        let key = (record.record_type(), record.id().clone());
        self.store.put(user, record)?;
        self.written.insert(key, Written::Record(now));
        self.stats.inserted += 1;
        Ok(())
    }

    fn extract<T: SyncRecord>(
        &self,
        extractor: &DeltaExtractor<'_>,
        user: &UserId,
        cursor: Cursor,
        full_resync: bool,
    ) -> ServerResult<Delta<T>> {
        let mut delta = extractor.delta::<T>(user, cursor, full_resync)?;
        if full_resync {
            return Ok(delta);
        }

        let kind = T::RECORD_TYPE;
        delta.records.retain(|record| {
            self.written.get(&(kind, record.id().clone()))
                != Some(&Written::Record(record.updated_at()))
        });

        let mut kept = Vec::with_capacity(delta.deleted.len());
        for id in delta.deleted {
            let own = match self.written.get(&(kind, id.clone())) {
                Some(Written::Tombstone(at)) => self
                    .store
                    .tombstone(user, kind, &id)?
                    .is_some_and(|t| t.deleted_at == *at),
                _ => false,
            };
            if !own {
                kept.push(id);
            }
        }
        delta.deleted = kept;
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::{Loan, LoanPayment, ManualClock, MemoryStore, Transaction};

    struct Fixture {
        store: MemoryStore,
        clock: ManualClock,
        config: ServerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                clock: ManualClock::default(),
                config: ServerConfig::default(),
            }
        }

        fn sync(&self, request: SyncRequest) -> ServerResult<SyncResponse> {
            Reconciler::new(&self.store, &self.clock, &self.config).reconcile(&principal(), request)
        }

        fn tx(&self, id: &str) -> Option<Transaction> {
            self.store
                .get(&user(), RecordType::Transaction, &RecordId::new(id))
                .unwrap()
                .and_then(Transaction::from_record)
        }
    }

    fn user() -> UserId {
        UserId::new("u1")
    }

    fn principal() -> Principal {
        Principal::new(user())
    }

    fn tx(id: &str, amount: f64) -> Transaction {
        let mut tx = Transaction::new(RecordId::new(id), amount, "Food", "2026-01-15");
        tx.created_at = Timestamp::from_millis(5);
        tx.updated_at = Timestamp::from_millis(5);
        tx
    }

    fn request(batch: ChangeBatch<Transaction>) -> SyncRequest {
        let mut request = SyncRequest::new(Timestamp::EPOCH);
        request.changes.transactions = Some(batch);
        request
    }

    fn creates(records: Vec<Transaction>) -> SyncRequest {
        request(ChangeBatch {
            new: records,
            ..ChangeBatch::default()
        })
    }

    #[test]
    fn create_is_stored_with_server_stamps() {
        let fx = Fixture::new();
        let response = fx.sync(creates(vec![tx("t1", 500.0)])).unwrap();

        let stored = fx.tx("t1").unwrap();
        assert_eq!(stored.amount, 500.0);
        assert_eq!(stored.user_id, user());
        assert_eq!(stored.month_key, "2026-01");
        assert_eq!(stored.created_at, Timestamp::from_millis(5));
        assert!(stored.updated_at > Timestamp::from_millis(5));
        assert!(response.sync_timestamp > stored.updated_at);
    }

    #[test]
    fn own_writes_are_not_echoed() {
        let fx = Fixture::new();
        let response = fx.sync(creates(vec![tx("t1", 500.0)])).unwrap();

        assert_eq!(response.changes.transactions, Some(Vec::new()));
        assert_eq!(response.changes.deleted_transactions, Some(Vec::new()));
        assert!(response.changes.loans.is_none());
    }

    #[test]
    fn first_create_wins() {
        let fx = Fixture::new();
        fx.sync(creates(vec![tx("t1", 500.0)])).unwrap();
        fx.sync(creates(vec![tx("t1", 999.0)])).unwrap();

        assert_eq!(fx.tx("t1").unwrap().amount, 500.0);
    }

    #[test]
    fn update_overwrites_regardless_of_stamp() {
        let fx = Fixture::new();
        fx.sync(creates(vec![tx("t1", 500.0)])).unwrap();
        let before = fx.tx("t1").unwrap();

        let mut stale = tx("t1", 42.0);
        stale.updated_at = Timestamp::EPOCH;
        fx.sync(request(ChangeBatch {
            updated: vec![stale],
            ..ChangeBatch::default()
        }))
        .unwrap();

        let after = fx.tx("t1").unwrap();
        assert_eq!(after.amount, 42.0);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[test]
    fn misclassified_update_inserts() {
        let fx = Fixture::new();
        fx.sync(request(ChangeBatch {
            updated: vec![tx("t9", 1.0)],
            ..ChangeBatch::default()
        }))
        .unwrap();

        assert!(fx.tx("t9").is_some());
    }

    #[test]
    fn stale_update_does_not_resurrect() {
        let fx = Fixture::new();
        fx.sync(creates(vec![tx("t1", 500.0)])).unwrap();
        fx.sync(request(ChangeBatch {
            deleted: vec![RecordId::new("t1")],
            ..ChangeBatch::default()
        }))
        .unwrap();
        fx.sync(request(ChangeBatch {
            updated: vec![tx("t1", 1.0)],
            ..ChangeBatch::default()
        }))
        .unwrap();

        assert_eq!(
            fx.store
                .presence(&user(), RecordType::Transaction, &RecordId::new("t1"))
                .unwrap(),
            Presence::Deleted
        );
    }

    #[test]
    fn delete_wins_over_create_in_one_batch() {
        let fx = Fixture::new();
        fx.sync(request(ChangeBatch {
            new: vec![tx("x", 1.0)],
            updated: Vec::new(),
            deleted: vec![RecordId::new("x")],
        }))
        .unwrap();

        assert!(fx.tx("x").is_none());
        assert!(fx
            .store
            .tombstone(&user(), RecordType::Transaction, &RecordId::new("x"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn retry_is_idempotent() {
        let fx = Fixture::new();
        let batch = ChangeBatch {
            new: vec![tx("a", 1.0), tx("b", 2.0)],
            updated: vec![tx("a", 3.0)],
            deleted: vec![RecordId::new("b")],
        };
        fx.sync(request(batch.clone())).unwrap();
        let once = fx.store.list_live(&user(), RecordType::Transaction).unwrap();
        let tombstones_once = fx.store.since(&user(), RecordType::Transaction, Timestamp::EPOCH).unwrap();
        let stamp_once = fx
            .store
            .tombstone(&user(), RecordType::Transaction, &RecordId::new("b"))
            .unwrap();

        fx.sync(request(batch)).unwrap();
        let twice = fx.store.list_live(&user(), RecordType::Transaction).unwrap();
        let tombstones_twice = fx.store.since(&user(), RecordType::Transaction, Timestamp::EPOCH).unwrap();
        let stamp_twice = fx
            .store
            .tombstone(&user(), RecordType::Transaction, &RecordId::new("b"))
            .unwrap();

        assert_eq!(once, twice);
        assert_eq!(tombstones_once, tombstones_twice);
        assert_eq!(stamp_once, stamp_twice);
    }

    #[test]
    fn other_writers_are_delivered() {
        let fx = Fixture::new();
        fx.sync(creates(vec![tx("mine", 1.0)])).unwrap();

        let response = fx.sync(creates(vec![tx("other", 2.0)])).unwrap();
        let ids: Vec<_> = response
            .changes
            .transactions
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![RecordId::new("mine")]);
    }

    #[test]
    fn invalid_batch_applies_nothing() {
        let fx = Fixture::new();
        let mut bad = tx("bad", 1.0);
        bad.date = "yesterday".into();

        let err = fx.sync(creates(vec![tx("good", 1.0), bad])).unwrap_err();
        match err {
            ServerError::Validation { details, .. } => {
                assert_eq!(details.len(), 1);
                assert!(details[0].starts_with("changes.transactions.new[1].date"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fx.tx("good").is_none());
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let mut fx = Fixture::new();
        fx.config = ServerConfig::new().with_max_batch_records(1);

        let err = fx
            .sync(creates(vec![tx("a", 1.0), tx("b", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert!(fx.tx("a").is_none());
    }

    #[test]
    fn disabled_type_is_rejected() {
        let mut fx = Fixture::new();
        fx.config = ServerConfig::new().with_record_types([RecordType::Transaction]);

        let mut request = SyncRequest::new(Timestamp::EPOCH);
        request.changes.loans = Some(ChangeBatch::default());
        assert!(matches!(fx.sync(request), Err(ServerError::Validation { .. })));
    }

    #[test]
    fn empty_request_covers_configured_types() {
        let fx = Fixture::new();
        let response = fx.sync(SyncRequest::new(Timestamp::EPOCH)).unwrap();

        assert_eq!(response.changes.transactions, Some(Vec::new()));
        assert_eq!(response.changes.loans, Some(Vec::new()));
    }

    #[test]
    fn paid_installments_survive_a_stale_loan_update() {
        let fx = Fixture::new();
        let paid_at = Timestamp::from_millis(7);
        let loan = Loan {
            id: RecordId::new("l1"),
            user_id: UserId::default(),
            name: "Car".into(),
            principal: 1_200.0,
            interest_rate: 0.0,
            duration_months: 2,
            start_date: "2026-01-01".into(),
            emi_amount: 600.0,
            total_interest: 0.0,
            payments: vec![
                LoanPayment {
                    month_number: 1,
                    is_paid: true,
                    paid_date: Some(paid_at),
                },
                LoanPayment::unpaid(2),
            ],
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
        };
        let mut stale = loan.clone();
        stale.name = "Family car".into();
        stale.payments = vec![LoanPayment::unpaid(1), LoanPayment::unpaid(2)];

        let mut first = SyncRequest::new(Timestamp::EPOCH);
        first.changes.loans = Some(ChangeBatch {
            new: vec![loan],
            ..ChangeBatch::default()
        });
        fx.sync(first).unwrap();

        let mut second = SyncRequest::new(Timestamp::EPOCH);
        second.changes.loans = Some(ChangeBatch {
            updated: vec![stale],
            ..ChangeBatch::default()
        });
        fx.sync(second).unwrap();

        let stored = fx
            .store
            .get(&user(), RecordType::Loan, &RecordId::new("l1"))
            .unwrap()
            .and_then(Loan::from_record)
            .unwrap();
        assert_eq!(stored.name, "Family car");
        assert_eq!(stored.payments[0].paid_date, Some(paid_at));
        assert!(stored.payments[0].is_paid);
    }

    #[test]
    fn stats_count_decisions() {
        let fx = Fixture::new();
        let mut reconciler = Reconciler::new(&fx.store, &fx.clock, &fx.config);
        reconciler
            .reconcile(
                &principal(),
                request(ChangeBatch {
                    new: vec![tx("a", 1.0), tx("a", 2.0)],
                    updated: vec![tx("b", 1.0)],
                    deleted: vec![RecordId::new("zz")],
                }),
            )
            .unwrap();

        assert_eq!(
            reconciler.stats(),
            ReconcileStats {
                inserted: 2,
                updated: 0,
                deleted: 1,
                skipped: 1,
            }
        );
    }
}

//! Request handlers for the sync and record endpoints.

use crate::auth::{Authenticator, Credentials, Principal};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::extractor::DeltaExtractor;
use crate::reconciler::Reconciler;
use finsync_core::{
    amortization, Clock, Cursor, EntityStore, Loan, Record, RecordId, RecordType, SyncRecord,
    SyncStore, Timestamp, TombstoneLog, Transaction, UserId,
};
use finsync_sync_protocol::{
    validate_loan, validate_transaction, ApiRequest, DeleteAck, NewLoan, NewTransaction,
    PayInstallment, PullResponse, SyncRequest, SyncResponse,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fields a direct update never takes from the request body.
const SERVER_OWNED_FIELDS: [&str; 4] = ["id", "userId", "createdAt", "updatedAt"];

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Entity Store and Tombstone Log (shared across all handlers).
    pub store: Arc<dyn SyncStore>,
    /// Source of every server stamp.
    pub clock: Arc<dyn Clock>,
    /// Resolves request credentials to a principal.
    pub authenticator: Arc<dyn Authenticator>,
    /// One lock per user, held from the first stamp of a call until its
    /// writes are visible.
    commits: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SyncStore>,
        clock: Arc<dyn Clock>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            authenticator,
            commits: Mutex::new(HashMap::new()),
        }
    }

    /// The lock serializing `user`'s stamps with their storage writes.
    ///
    /// A reader's `syncTimestamp` must not overtake a stamp whose record is
    /// not yet stored, or that record would fall behind the reader's cursor.
    /// Readers only see their own partition, so other users never wait.
    fn commit_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        Arc::clone(self.commits.lock().entry(user.clone()).or_default())
    }
}

/// Handler for API requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Resolves the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unauthorized`] if no principal can be resolved.
    pub fn authenticate(&self, request: &ApiRequest) -> ServerResult<Principal> {
        let credentials = Credentials::from_request(request);
        self.context
            .authenticator
            .authenticate(&credentials)
            .ok_or(ServerError::Unauthorized)
    }

    /// Handles `POST /api/sync`.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub fn handle_sync(
        &self,
        principal: &Principal,
        request: SyncRequest,
    ) -> ServerResult<SyncResponse> {
        let ctx = &*self.context;
        let lock = ctx.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        Reconciler::new(ctx.store.as_ref(), ctx.clock.as_ref(), &ctx.config)
            .reconcile(principal, request)
    }

    /// Handles `GET /api/{type}/sync?lastSync=`: the delta without a write step.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Validation`] if the type is not synced here.
    pub fn handle_pull<T: SyncRecord>(
        &self,
        principal: &Principal,
        cursor: Cursor,
    ) -> ServerResult<PullResponse<T>> {
        let ctx = &*self.context;
        if !ctx.config.syncs(T::RECORD_TYPE) {
            return Err(ServerError::validation(format!(
                "{} are not synced by this server",
                T::RECORD_TYPE.collection()
            )));
        }

        let lock = ctx.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        let sync_timestamp = ctx.clock.now();
        let extractor = DeltaExtractor::new(ctx.store.as_ref());
        let full_resync = extractor.needs_full_resync(cursor)?;
        let delta = extractor.delta::<T>(&principal.user_id, cursor, full_resync)?;

        tracing::debug!(
            user = %principal.user_id,
            cursor = %cursor,
            records = delta.records.len(),
            deleted = delta.deleted.len(),
            full_resync,
            "pull"
        );
        Ok(PullResponse::from_delta(delta, sync_timestamp, full_resync))
    }

    /// Lists live transactions, newest `date` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_transactions(&self, principal: &Principal) -> ServerResult<Vec<Transaction>> {
        let mut transactions = self.list::<Transaction>(principal)?;
        transactions.sort_by_cached_key(|t| {
            std::cmp::Reverse(Timestamp::parse(&t.date).unwrap_or(Timestamp::EPOCH))
        });
        Ok(transactions)
    }

    /// Lists live loans, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_loans(&self, principal: &Principal) -> ServerResult<Vec<Loan>> {
        let mut loans = self.list::<Loan>(principal)?;
        loans.sort_by_key(|l| std::cmp::Reverse(l.created_at));
        Ok(loans)
    }

    fn list<T: SyncRecord>(&self, principal: &Principal) -> ServerResult<Vec<T>> {
        Ok(self
            .context
            .store
            .list_live(&principal.user_id, T::RECORD_TYPE)?
            .into_iter()
            .filter_map(T::from_record)
            .collect())
    }

    /// Creates a transaction with a server-assigned ID.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Validation`] for a bad body.
    pub fn create_transaction(
        &self,
        principal: &Principal,
        body: NewTransaction,
    ) -> ServerResult<Transaction> {
        body.validate()?;

        let lock = self.context.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        let now = self.context.clock.now();
        let transaction = Transaction {
            id: RecordId::generate(),
            user_id: principal.user_id.clone(),
            amount: body.amount,
            category: body.category,
            note: body.note,
            month_key: amortization::month_key(&body.date).unwrap_or_default(),
            date: body.date,
            is_income: body.is_income,
            created_at: now,
            updated_at: now,
        };
        self.store(principal, transaction.clone().into_record())?;
        tracing::info!(user = %principal.user_id, id = %transaction.id, "transaction created");
        Ok(transaction)
    }

    /// Creates a loan with a server-assigned ID and computed schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Validation`] for a bad body.
    pub fn create_loan(&self, principal: &Principal, body: NewLoan) -> ServerResult<Loan> {
        body.validate()?;

        let emi = amortization::calculate_emi(body.principal, body.interest_rate, body.duration_months);
        let lock = self.context.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        let now = self.context.clock.now();
        let loan = Loan {
            id: RecordId::generate(),
            user_id: principal.user_id.clone(),
            total_interest: amortization::calculate_total_interest(
                body.principal,
                emi,
                body.duration_months,
            ),
            payments: amortization::payment_schedule(body.duration_months),
            name: body.name,
            principal: body.principal,
            interest_rate: body.interest_rate,
            duration_months: body.duration_months,
            start_date: body.start_date,
            emi_amount: emi,
            created_at: now,
            updated_at: now,
        };
        self.store(principal, loan.clone().into_record())?;
        tracing::info!(user = %principal.user_id, id = %loan.id, "loan created");
        Ok(loan)
    }

    /// Merges the fields of `body` into a stored record.
    ///
    /// The target ID comes from `id` or, failing that, from the body's
    /// `id` field. Server-owned fields in the body are ignored.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] if the body is not an object, names no
    ///   ID, or the merged record is invalid.
    /// - [`ServerError::NotFound`] if no live record has the ID.
    pub fn update_record(
        &self,
        principal: &Principal,
        record_type: RecordType,
        id: Option<RecordId>,
        body: Value,
    ) -> ServerResult<Record> {
        let Value::Object(fields) = body else {
            return Err(ServerError::validation("body must be a JSON object"));
        };
        let id = match id {
            Some(id) => id,
            None => match fields.get("id") {
                Some(Value::String(id)) if !id.trim().is_empty() => RecordId::new(id.as_str()),
                _ => return Err(ServerError::validation("id is required")),
            },
        };

        let lock = self.context.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        let stored = self
            .context
            .store
            .get(&principal.user_id, record_type, &id)?
            .ok_or_else(|| ServerError::not_found(type_label(record_type)))?;

        let mut merged = match &stored {
            Record::Transaction(t) => serde_json::to_value(t),
            Record::Loan(l) => serde_json::to_value(l),
        }
        .map_err(|e| ServerError::Internal(e.to_string()))?;
        if let Value::Object(target) = &mut merged {
            for (key, value) in fields {
                if !SERVER_OWNED_FIELDS.contains(&key.as_str()) {
                    target.insert(key, value);
                }
            }
        }

        let mut details = Vec::new();
        let mut record = match record_type {
            RecordType::Transaction => {
                let mut tx: Transaction = serde_json::from_value(merged)
                    .map_err(|e| ServerError::validation(e.to_string()))?;
                validate_transaction(&tx, "body", &mut details);
                tx.month_key = amortization::month_key(&tx.date).unwrap_or_default();
                Record::Transaction(tx)
            }
            RecordType::Loan => {
                let mut loan: Loan = serde_json::from_value(merged)
                    .map_err(|e| ServerError::validation(e.to_string()))?;
                validate_loan(&loan, "body", &mut details);
                if let Record::Loan(old) = &stored {
                    loan.absorb_paid_ledger(old);
                }
                Record::Loan(loan)
            }
        };
        if !details.is_empty() {
            return Err(ServerError::Validation {
                message: "invalid record".to_string(),
                details,
            });
        }
        if record.same_content(&stored) {
            return Ok(stored);
        }

        record.set_stamps(stored.created_at(), self.context.clock.now());
        self.store(principal, record.clone())?;
        tracing::info!(user = %principal.user_id, id = %id, kind = %record_type, "record updated");
        Ok(record)
    }

    /// Deletes a live record: soft delete plus tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] if no live record has the ID.
    pub fn delete_record(
        &self,
        principal: &Principal,
        record_type: RecordType,
        id: &RecordId,
    ) -> ServerResult<DeleteAck> {
        let ctx = &*self.context;
        let user = &principal.user_id;

        let lock = ctx.commit_lock(user);
        let _commit = lock.lock();
        if ctx.store.get(user, record_type, id)?.is_none() {
            return Err(ServerError::not_found(type_label(record_type)));
        }
        ctx.store.soft_delete(user, record_type, id)?;
        ctx.store.record(user, record_type, id, ctx.clock.now())?;
        tracing::info!(user = %user, id = %id, kind = %record_type, "record deleted");
        Ok(DeleteAck { success: true })
    }

    /// Marks one installment of a loan paid.
    ///
    /// Paying a month that is already paid changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] for a missing loan or month, and
    /// [`ServerError::Validation`] for month zero.
    pub fn pay_installment(
        &self,
        principal: &Principal,
        id: &RecordId,
        body: PayInstallment,
    ) -> ServerResult<Loan> {
        body.validate()?;

        let lock = self.context.commit_lock(&principal.user_id);
        let _commit = lock.lock();
        let mut loan = self
            .context
            .store
            .get(&principal.user_id, RecordType::Loan, id)?
            .and_then(Loan::from_record)
            .ok_or_else(|| ServerError::not_found("Loan"))?;

        let now = self.context.clock.now();
        let payment = loan
            .payments
            .iter_mut()
            .find(|p| p.month_number == body.month_number)
            .ok_or_else(|| ServerError::not_found("Installment"))?;
        if payment.is_paid {
            return Ok(loan);
        }
        payment.is_paid = true;
        payment.paid_date = Some(now);
        loan.updated_at = now;

        self.store(principal, loan.clone().into_record())?;
        tracing::info!(
            user = %principal.user_id,
            id = %id,
            month = body.month_number,
            "installment paid"
        );
        Ok(loan)
    }

    fn store(&self, principal: &Principal, record: Record) -> ServerResult<()> {
        self.context.store.put(&principal.user_id, record)?;
        Ok(())
    }
}

fn type_label(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::Transaction => "Transaction",
        RecordType::Loan => "Loan",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use finsync_core::{ManualClock, MemoryStore, Presence, UserId};
    use serde_json::json;

    fn handler() -> RequestHandler {
        let auth = StaticAuthenticator::new().with_token("t1", UserId::new("u1"));
        let context = HandlerContext::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
            Arc::new(auth),
        );
        RequestHandler::new(Arc::new(context))
    }

    fn principal() -> Principal {
        Principal::new(UserId::new("u1"))
    }

    fn new_tx(amount: f64, date: &str) -> NewTransaction {
        NewTransaction {
            amount,
            category: "Food".into(),
            note: None,
            date: date.into(),
            is_income: false,
        }
    }

    fn new_loan() -> NewLoan {
        NewLoan {
            name: "Car".into(),
            principal: 100_000.0,
            interest_rate: 12.0,
            duration_months: 12,
            start_date: "2026-01-01".into(),
        }
    }

    #[test]
    fn authenticate_with_bearer() {
        let handler = handler();
        let ok = ApiRequest::get("/api/loans").with_bearer("t1");
        assert_eq!(handler.authenticate(&ok).unwrap(), principal());

        let bad = ApiRequest::get("/api/loans").with_bearer("nope");
        assert!(matches!(
            handler.authenticate(&bad),
            Err(ServerError::Unauthorized)
        ));
    }

    #[test]
    fn create_transaction_assigns_id_and_month() {
        let handler = handler();
        let tx = handler
            .create_transaction(&principal(), new_tx(500.0, "2026-03-09"))
            .unwrap();

        assert!(!tx.id.is_empty());
        assert_eq!(tx.month_key, "2026-03");
        assert_eq!(tx.user_id, UserId::new("u1"));
        assert_eq!(tx.created_at, tx.updated_at);
    }

    #[test]
    fn create_transaction_rejects_non_positive_amount() {
        let handler = handler();
        let err = handler
            .create_transaction(&principal(), new_tx(0.0, "2026-03-09"))
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
    }

    #[test]
    fn transactions_list_newest_date_first() {
        let handler = handler();
        for date in ["2026-01-10", "2026-03-01", "2026-02-14"] {
            handler.create_transaction(&principal(), new_tx(1.0, date)).unwrap();
        }

        let dates: Vec<_> = handler
            .list_transactions(&principal())
            .unwrap()
            .into_iter()
            .map(|t| t.date)
            .collect();
        assert_eq!(dates, vec!["2026-03-01", "2026-02-14", "2026-01-10"]);
    }

    #[test]
    fn create_loan_computes_schedule() {
        let handler = handler();
        let loan = handler.create_loan(&principal(), new_loan()).unwrap();

        assert_eq!(loan.emi_amount, 8884.88);
        assert_eq!(loan.total_interest, 6618.56);
        assert_eq!(loan.payments.len(), 12);
        assert!(loan.payments.iter().all(|p| !p.is_paid));
    }

    #[test]
    fn pay_installment_once() {
        let handler = handler();
        let loan = handler.create_loan(&principal(), new_loan()).unwrap();

        let paid = handler
            .pay_installment(&principal(), &loan.id, PayInstallment { month_number: 3 })
            .unwrap();
        let entry = paid.payment(3).unwrap().clone();
        assert!(entry.is_paid);
        assert!(paid.updated_at > loan.updated_at);

        let again = handler
            .pay_installment(&principal(), &loan.id, PayInstallment { month_number: 3 })
            .unwrap();
        assert_eq!(again.payment(3), Some(&entry));
        assert_eq!(again.updated_at, paid.updated_at);
    }

    #[test]
    fn pay_installment_not_found() {
        let handler = handler();
        let loan = handler.create_loan(&principal(), new_loan()).unwrap();

        let missing_month = handler
            .pay_installment(&principal(), &loan.id, PayInstallment { month_number: 13 })
            .unwrap_err();
        assert!(matches!(missing_month, ServerError::NotFound { .. }));

        let missing_loan = handler
            .pay_installment(&principal(), &RecordId::new("nope"), PayInstallment { month_number: 1 })
            .unwrap_err();
        assert!(matches!(missing_loan, ServerError::NotFound { .. }));
    }

    #[test]
    fn update_merges_fields() {
        let handler = handler();
        let tx = handler
            .create_transaction(&principal(), new_tx(500.0, "2026-03-09"))
            .unwrap();

        let updated = handler
            .update_record(
                &principal(),
                RecordType::Transaction,
                None,
                json!({ "id": tx.id, "amount": 42.5, "date": "2026-04-01", "userId": "intruder" }),
            )
            .unwrap();
        let Record::Transaction(updated) = updated else {
            panic!("expected a transaction");
        };

        assert_eq!(updated.amount, 42.5);
        assert_eq!(updated.category, "Food");
        assert_eq!(updated.month_key, "2026-04");
        assert_eq!(updated.user_id, UserId::new("u1"));
        assert_eq!(updated.created_at, tx.created_at);
        assert!(updated.updated_at > tx.updated_at);
    }

    #[test]
    fn update_requires_live_record() {
        let handler = handler();
        let err = handler
            .update_record(&principal(), RecordType::Loan, None, json!({ "id": "ghost" }))
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound { .. }));

        let err = handler
            .update_record(&principal(), RecordType::Loan, None, json!({ "name": "x" }))
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
    }

    #[test]
    fn update_rejects_invalid_merge() {
        let handler = handler();
        let tx = handler
            .create_transaction(&principal(), new_tx(500.0, "2026-03-09"))
            .unwrap();

        let err = handler
            .update_record(
                &principal(),
                RecordType::Transaction,
                Some(tx.id.clone()),
                json!({ "date": "someday" }),
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
    }

    #[test]
    fn delete_then_not_found() {
        let handler = handler();
        let tx = handler
            .create_transaction(&principal(), new_tx(500.0, "2026-03-09"))
            .unwrap();

        let ack = handler
            .delete_record(&principal(), RecordType::Transaction, &tx.id)
            .unwrap();
        assert!(ack.success);
        assert_eq!(
            handler
                .context()
                .store
                .presence(&principal().user_id, RecordType::Transaction, &tx.id)
                .unwrap(),
            Presence::Deleted
        );

        let err = handler
            .delete_record(&principal(), RecordType::Transaction, &tx.id)
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound { .. }));
    }

    #[test]
    fn pull_reports_direct_writes() {
        let handler = handler();
        let tx = handler
            .create_transaction(&principal(), new_tx(500.0, "2026-03-09"))
            .unwrap();

        let first: PullResponse<Transaction> =
            handler.handle_pull(&principal(), Timestamp::EPOCH).unwrap();
        assert_eq!(first.records, vec![tx.clone()]);

        handler
            .delete_record(&principal(), RecordType::Transaction, &tx.id)
            .unwrap();
        let second: PullResponse<Transaction> = handler
            .handle_pull(&principal(), first.sync_timestamp)
            .unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.deleted, vec![tx.id]);
    }

    #[test]
    fn commit_locks_are_per_user() {
        let handler = handler();
        let ctx = handler.context();
        let mine = ctx.commit_lock(&UserId::new("u1"));
        let again = ctx.commit_lock(&UserId::new("u1"));
        let theirs = ctx.commit_lock(&UserId::new("u2"));
        assert!(Arc::ptr_eq(&mine, &again));
        assert!(!Arc::ptr_eq(&mine, &theirs));

        let _held = mine.lock();
        assert!(again.try_lock().is_none());
        assert!(theirs.try_lock().is_some());

        let other = Principal::new(UserId::new("u2"));
        let pulled: PullResponse<Transaction> =
            handler.handle_pull(&other, Timestamp::EPOCH).unwrap();
        assert!(pulled.records.is_empty());
    }
}

//! End-to-end behavior of the sync server through its request envelope.

use finsync_core::{
    EntityStore, ManualClock, RecordId, RecordType, Timestamp, TombstoneLog, Transaction, UserId,
};
use finsync_sync_protocol::{
    paths, ApiRequest, ApiResponse, ChangeBatch, DeleteAck, LoanBody, Method, PullResponse,
    SyncRequest, SyncResponse, TransactionBody, TransactionList,
};
use finsync_sync_server::{
    spawn_maintenance, Principal, ServerConfig, StaticAuthenticator, SyncServer,
};
use finsync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const PHONE: &str = "phone-token";
const LAPTOP: &str = "laptop-token";
const STRANGER: &str = "stranger-token";

struct Harness {
    server: SyncServer,
    store: TestStore,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with(TestStore::memory(), ServerConfig::default())
    }

    fn with(store: TestStore, config: ServerConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let auth = StaticAuthenticator::new()
            .with_token(PHONE, test_user())
            .with_token(LAPTOP, test_user())
            .with_token(STRANGER, UserId::new("someone-else"));
        let server = SyncServer::with_authenticator(
            config,
            store.shared(),
            clock.clone(),
            Arc::new(auth),
        );
        Self {
            server,
            store,
            clock,
        }
    }

    fn send(&self, token: &str, request: ApiRequest) -> ApiResponse {
        self.server.handle(request.with_bearer(token))
    }

    fn sync(&self, token: &str, request: &SyncRequest) -> SyncResponse {
        let response = self.send(token, ApiRequest::json(Method::Post, paths::SYNC, request).unwrap());
        assert_eq!(response.status, 200, "{:?}", response.error_body());
        response.parse_json().unwrap()
    }

    fn pull(&self, token: &str, cursor: Timestamp) -> PullResponse<Transaction> {
        let response = self.send(token, ApiRequest::pull(RecordType::Transaction, cursor));
        assert_eq!(response.status, 200, "{:?}", response.error_body());
        response.parse_json().unwrap()
    }
}

fn push(cursor: Timestamp, batch: ChangeBatch<Transaction>) -> SyncRequest {
    let mut request = SyncRequest::new(cursor);
    request.changes.transactions = Some(batch);
    request
}

fn ids(records: &[Transaction]) -> Vec<&str> {
    records.iter().map(|t| t.id.as_str()).collect()
}

#[test]
fn two_devices_converge_on_a_delete() {
    let h = Harness::new();

    // Phone creates t1 offline, then syncs from scratch.
    let mut t1 = sample_transaction("t1", 500.0);
    t1.category = "Food".into();
    let first = h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![t1],
                ..ChangeBatch::default()
            },
        ),
    );
    assert!(first.changes.is_empty());
    let phone_cursor = first.sync_timestamp;

    // Laptop syncs from scratch and receives t1.
    let laptop = h.sync(LAPTOP, &SyncRequest::new(Timestamp::EPOCH));
    let received = laptop.changes.transactions.clone().unwrap();
    assert_eq!(ids(&received), vec!["t1"]);
    assert_eq!(received[0].amount, 500.0);
    assert_eq!(received[0].category, "Food");

    // Laptop deletes t1.
    let deleted = h.sync(
        LAPTOP,
        &push(
            laptop.sync_timestamp,
            ChangeBatch {
                deleted: vec![RecordId::new("t1")],
                ..ChangeBatch::default()
            },
        ),
    );
    assert!(deleted.changes.is_empty());
    assert!(deleted.sync_timestamp > laptop.sync_timestamp);

    // Phone learns about the delete.
    let again = h.sync(PHONE, &push(phone_cursor, ChangeBatch::default()));
    assert_eq!(again.changes.transactions, Some(Vec::new()));
    assert_eq!(
        again.changes.deleted_transactions,
        Some(vec![RecordId::new("t1")])
    );
}

#[test]
fn concurrent_devices_never_miss_each_others_writes() {
    const ROUNDS: usize = 40;
    let h = Harness::new();

    // Each device creates one record per round and collects what it learns.
    let device = |token: &str, prefix: &str| {
        let mut cursor = Timestamp::EPOCH;
        let mut known = BTreeSet::new();
        for round in 0..ROUNDS {
            let id = format!("{prefix}-{round}");
            let response = h.sync(
                token,
                &push(
                    cursor,
                    ChangeBatch {
                        new: vec![sample_transaction(&id, 1.0)],
                        ..ChangeBatch::default()
                    },
                ),
            );
            known.insert(id);
            for record in response.changes.transactions.unwrap_or_default() {
                known.insert(record.id.as_str().to_string());
            }
            cursor = response.sync_timestamp;
        }
        (cursor, known)
    };

    let ((phone_cursor, mut phone), (laptop_cursor, mut laptop)) = std::thread::scope(|s| {
        let phone = s.spawn(|| device(PHONE, "phone"));
        let laptop = s.spawn(|| device(LAPTOP, "laptop"));
        (phone.join().unwrap(), laptop.join().unwrap())
    });

    for (token, cursor, known) in [
        (PHONE, phone_cursor, &mut phone),
        (LAPTOP, laptop_cursor, &mut laptop),
    ] {
        let catch_up = h.pull(token, cursor);
        assert!(catch_up.deleted.is_empty());
        known.extend(catch_up.records.iter().map(|t| t.id.as_str().to_string()));
    }

    let everything: BTreeSet<String> = h
        .pull(PHONE, Timestamp::EPOCH)
        .records
        .iter()
        .map(|t| t.id.as_str().to_string())
        .collect();
    assert_eq!(everything.len(), 2 * ROUNDS);
    assert_eq!(phone, everything);
    assert_eq!(laptop, everything);
}

#[test]
fn pull_from_epoch_then_from_cursor() {
    let h = Harness::new();
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![sample_transaction("a", 1.0), sample_transaction("b", 2.0)],
                ..ChangeBatch::default()
            },
        ),
    );

    let everything = h.pull(LAPTOP, Timestamp::EPOCH);
    assert_eq!(ids(&everything.records), vec!["a", "b"]);

    let quiet = h.pull(LAPTOP, everything.sync_timestamp);
    assert!(quiet.records.is_empty());
    assert!(quiet.deleted.is_empty());

    let mut edit = sample_transaction("b", 20.0);
    edit.note = Some("refund".into());
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                updated: vec![edit],
                ..ChangeBatch::default()
            },
        ),
    );
    let later = h.pull(LAPTOP, everything.sync_timestamp);
    assert_eq!(ids(&later.records), vec!["b"]);
    assert_eq!(later.records[0].amount, 20.0);
}

#[test]
fn missing_cursor_means_epoch() {
    let h = Harness::new();
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![sample_transaction("a", 1.0)],
                ..ChangeBatch::default()
            },
        ),
    );

    let response = h.send(LAPTOP, ApiRequest::get(paths::pull(RecordType::Transaction)));
    let pulled: PullResponse<Transaction> = response.parse_json().unwrap();
    assert_eq!(ids(&pulled.records), vec!["a"]);

    let body = json!({ "lastSyncTimestamp": null, "changes": {} });
    let response = h.send(LAPTOP, ApiRequest::json(Method::Post, paths::SYNC, &body).unwrap());
    let synced: SyncResponse = response.parse_json().unwrap();
    assert_eq!(ids(&synced.changes.transactions.unwrap()), vec!["a"]);
}

#[test]
fn users_are_isolated() {
    let h = Harness::new();
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![sample_transaction("a", 1.0)],
                ..ChangeBatch::default()
            },
        ),
    );

    let theirs = h.pull(STRANGER, Timestamp::EPOCH);
    assert!(theirs.records.is_empty());
}

#[test]
fn unauthorized_requests_touch_nothing() {
    let h = Harness::new();
    let request = push(
        Timestamp::EPOCH,
        ChangeBatch {
            new: vec![sample_transaction("a", 1.0)],
            ..ChangeBatch::default()
        },
    );

    let anonymous = h
        .server
        .handle(ApiRequest::json(Method::Post, paths::SYNC, &request).unwrap());
    assert_eq!(anonymous.status, 401);
    assert_eq!(anonymous.error_body().unwrap().error, "Unauthorized");

    let forged = h.send(
        "made-up",
        ApiRequest::json(Method::Post, paths::SYNC, &request).unwrap(),
    );
    assert_eq!(forged.status, 401);

    let garbage = h.server.handle(ApiRequest {
        body: b"{not json".to_vec(),
        ..ApiRequest::new(Method::Post, paths::SYNC)
    });
    assert_eq!(garbage.status, 401);

    assert_eq!(h.store.stats().live_transactions, 0);
}

#[test]
fn server_without_secret_rejects_everyone() {
    let server = SyncServer::new(ServerConfig::default(), TestStore::memory().shared());
    let response = server.handle(ApiRequest::get("/api/loans").with_bearer("anything"));
    assert_eq!(response.status, 401);
    assert!(server.issue_token(&test_user()).is_none());
}

#[test]
fn issued_tokens_are_accepted() {
    let config = ServerConfig::default().with_auth(b"integration-secret".to_vec());
    let server = SyncServer::new(config, TestStore::memory().shared());
    let token = server.issue_token(&test_user()).unwrap();

    let response = server.handle(ApiRequest::get("/api/transactions").with_bearer(&token));
    assert_eq!(response.status, 200);

    let cookie = server.handle(
        ApiRequest::get("/api/transactions").with_header("Cookie", format!("theme=dark; session={token}")),
    );
    assert_eq!(cookie.status, 200);
}

#[test]
fn unknown_route_is_not_found() {
    let h = Harness::new();
    assert_eq!(h.send(PHONE, ApiRequest::get("/api/budgets")).status, 404);
    assert_eq!(h.server.handle(ApiRequest::get("/nowhere")).status, 404);
}

#[test]
fn malformed_batch_is_rejected_whole() {
    let h = Harness::new();
    let mut bad = sample_transaction("bad", 1.0);
    bad.amount = -5.0;
    let request = push(
        Timestamp::EPOCH,
        ChangeBatch {
            new: vec![sample_transaction("good", 1.0), bad],
            ..ChangeBatch::default()
        },
    );

    let response = h.send(PHONE, ApiRequest::json(Method::Post, paths::SYNC, &request).unwrap());
    assert_eq!(response.status, 400);
    let body = response.error_body().unwrap();
    assert_eq!(body.error, "Invalid input");
    assert_eq!(body.details.len(), 1);
    assert!(body.details[0].contains("new[1].amount"));

    assert!(h
        .store
        .get(&test_user(), RecordType::Transaction, &RecordId::new("good"))
        .unwrap()
        .is_none());
}

#[test]
fn bad_pull_cursor_is_rejected() {
    let h = Harness::new();
    let response = h.send(PHONE, ApiRequest::get("/api/transactions/sync?lastSync=soon"));
    assert_eq!(response.status, 400);
}

#[test]
fn pruned_cursor_gets_full_resync() {
    let h = Harness::new();
    let first = h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![sample_transaction("keep", 1.0), sample_transaction("drop", 2.0)],
                ..ChangeBatch::default()
            },
        ),
    );
    h.sync(
        PHONE,
        &push(
            first.sync_timestamp,
            ChangeBatch {
                deleted: vec![RecordId::new("drop")],
                ..ChangeBatch::default()
            },
        ),
    );

    let horizon = h.clock.peek();
    assert_eq!(h.server.prune_tombstones_before(horizon).unwrap(), 1);

    let stale = h.sync(LAPTOP, &SyncRequest::new(first.sync_timestamp));
    assert!(stale.full_resync);
    assert_eq!(ids(&stale.changes.transactions.unwrap()), vec!["keep"]);
    assert_eq!(stale.changes.deleted_transactions, Some(Vec::new()));

    let fresh = h.sync(LAPTOP, &SyncRequest::new(stale.sync_timestamp));
    assert!(!fresh.full_resync);
    assert!(fresh.changes.is_empty());
}

#[test]
fn retention_policy_drives_pruning() {
    let config = ServerConfig::default().with_tombstone_retention(Duration::from_secs(60));
    let h = Harness::with(TestStore::memory(), config);
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                deleted: vec![RecordId::new("x")],
                ..ChangeBatch::default()
            },
        ),
    );

    assert_eq!(h.server.prune_tombstones().unwrap(), 0);
    h.clock.advance(Duration::from_secs(120));
    assert_eq!(h.server.prune_tombstones().unwrap(), 1);
    assert_eq!(h.store.stats().tombstones, 0);
}

#[test]
fn direct_endpoints_round_trip() {
    let h = Harness::new();

    let created = h.send(
        PHONE,
        ApiRequest::json(
            Method::Post,
            paths::collection(RecordType::Transaction),
            &json!({ "amount": 12.5, "category": "Coffee", "date": "2026-02-03", "isIncome": false }),
        )
        .unwrap(),
    );
    assert_eq!(created.status, 201);
    let TransactionBody { transaction } = created.parse_json().unwrap();
    assert_eq!(transaction.month_key, "2026-02");

    let listed: TransactionList = h
        .send(LAPTOP, ApiRequest::get(paths::collection(RecordType::Transaction)))
        .parse_json()
        .unwrap();
    assert_eq!(listed.transactions, vec![transaction.clone()]);

    let updated = h.send(
        LAPTOP,
        ApiRequest::json(
            Method::Put,
            paths::collection(RecordType::Transaction),
            &json!({ "id": transaction.id, "category": "Cafe" }),
        )
        .unwrap(),
    );
    assert_eq!(updated.status, 200);
    let TransactionBody { transaction: edited } = updated.parse_json().unwrap();
    assert_eq!(edited.category, "Cafe");
    assert_eq!(edited.amount, 12.5);

    let path = paths::record(RecordType::Transaction, &transaction.id);
    let ack: DeleteAck = h.send(PHONE, ApiRequest::delete(&path)).parse_json().unwrap();
    assert!(ack.success);
    assert_eq!(h.send(PHONE, ApiRequest::delete(&path)).status, 404);

    // The other device sees the direct delete through sync.
    let pulled = h.pull(LAPTOP, Timestamp::EPOCH);
    assert!(pulled.records.is_empty());
    assert_eq!(pulled.deleted, vec![transaction.id]);
}

#[test]
fn pay_installment_over_the_envelope() {
    let h = Harness::new();
    let created = h.send(
        PHONE,
        ApiRequest::json(
            Method::Post,
            paths::collection(RecordType::Loan),
            &json!({ "name": "Car", "principal": 100000, "interestRate": 12, "durationMonths": 12, "startDate": "2026-01-01" }),
        )
        .unwrap(),
    );
    assert_eq!(created.status, 201);
    let LoanBody { loan } = created.parse_json().unwrap();

    let paid = h.send(
        PHONE,
        ApiRequest::json(Method::Post, paths::pay(&loan.id), &json!({ "monthNumber": 1 })).unwrap(),
    );
    assert_eq!(paid.status, 200);
    let LoanBody { loan: paid } = paid.parse_json().unwrap();
    assert!(paid.payment(1).unwrap().is_paid);

    let missing = h.send(
        PHONE,
        ApiRequest::json(Method::Post, paths::pay(&loan.id), &json!({ "monthNumber": 99 })).unwrap(),
    );
    assert_eq!(missing.status, 404);

    let zero = h.send(
        PHONE,
        ApiRequest::json(Method::Post, paths::pay(&loan.id), &json!({ "monthNumber": 0 })).unwrap(),
    );
    assert_eq!(zero.status, 400);
}

#[test]
fn journaled_state_survives_restart() {
    let h = Harness::with(TestStore::file(), ServerConfig::default());
    let response = h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                new: vec![sample_transaction("a", 1.0), sample_transaction("b", 2.0)],
                deleted: vec![RecordId::new("b")],
                ..ChangeBatch::default()
            },
        ),
    );

    let Harness { server, store, .. } = h;
    drop(server);
    let store = store.reopen();

    let live = store.list_live(&test_user(), RecordType::Transaction).unwrap();
    assert_eq!(live.len(), 1);
    let tombstoned = store
        .since(&test_user(), RecordType::Transaction, Timestamp::EPOCH)
        .unwrap();
    assert_eq!(tombstoned, vec![RecordId::new("b")]);
    assert!(response.sync_timestamp > Timestamp::EPOCH);
}

#[tokio::test]
async fn maintenance_task_prunes() {
    let config = ServerConfig::default().with_tombstone_retention(Duration::from_secs(1));
    let h = Harness::with(TestStore::memory(), config);
    h.sync(
        PHONE,
        &push(
            Timestamp::EPOCH,
            ChangeBatch {
                deleted: vec![RecordId::new("x")],
                ..ChangeBatch::default()
            },
        ),
    );
    h.clock.advance(Duration::from_secs(10));

    let Harness { server, store, .. } = h;
    let task = spawn_maintenance(Arc::new(server), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    task.abort();

    assert_eq!(store.stats().tombstones, 0);
}

fn snapshot(store: &TestStore) -> (Vec<finsync_core::Record>, Vec<RecordId>, Vec<Option<Timestamp>>) {
    let live = store.list_live(&test_user(), RecordType::Transaction).unwrap();
    let deleted = store
        .since(&test_user(), RecordType::Transaction, Timestamp::EPOCH)
        .unwrap();
    let stamps = deleted
        .iter()
        .map(|id| {
            store
                .tombstone(&test_user(), RecordType::Transaction, id)
                .unwrap()
                .map(|t| t.deleted_at)
        })
        .collect();
    (live, deleted, stamps)
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn retried_batch_changes_nothing(batch in transaction_batch_strategy(6)) {
        let h = Harness::new();
        let principal = Principal::new(test_user());
        let request = push(Timestamp::EPOCH, batch);

        h.server.handler().handle_sync(&principal, request.clone()).unwrap();
        let once = snapshot(&h.store);
        h.server.handler().handle_sync(&principal, request).unwrap();
        let twice = snapshot(&h.store);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn deltas_are_partitioned(
        batches in prop::collection::vec(transaction_batch_strategy(4), 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let h = Harness::new();
        let principal = Principal::new(test_user());
        let mut cursors = vec![Timestamp::EPOCH];
        for batch in batches {
            let response = h.server.handler().handle_sync(&principal, push(Timestamp::EPOCH, batch)).unwrap();
            cursors.push(response.sync_timestamp);
        }

        let cursor = cursors[pick.index(cursors.len())];
        let pulled: PullResponse<Transaction> = h.server.handler().handle_pull(&principal, cursor).unwrap();
        for record in &pulled.records {
            prop_assert!(!pulled.deleted.contains(&record.id));
        }
        for record in &pulled.records {
            prop_assert!(record.updated_at > cursor);
        }
    }
}

//! Test fixtures and store helpers.
//!
//! Provides stores with automatic cleanup and records with valid
//! defaults, so tests only spell out the fields they care about.

use finsync_core::{
    amortization, JournaledStore, Loan, RecordId, StoreConfig, Timestamp, Transaction, UserId,
};
use finsync_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A journaled test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<JournaledStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a store journaling into memory.
    pub fn memory() -> Self {
        let store = JournaledStore::with_backend(Box::new(InMemoryBackend::new()), false)
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            temp_dir: None,
        }
    }

    /// Creates a store journaling into a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Self::open_in(temp_dir.path());
        Self {
            store: Arc::new(store),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes and reopens a file-based store, replaying its journal.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, or if another handle to the store is
    /// still alive.
    pub fn reopen(self) -> Self {
        let temp_dir = self.temp_dir.expect("Only file stores can be reopened");
        assert_eq!(
            Arc::strong_count(&self.store),
            1,
            "Store is still shared; drop other handles first"
        );
        drop(self.store);

        let store = Self::open_in(temp_dir.path());
        Self {
            store: Arc::new(store),
            temp_dir: Some(temp_dir),
        }
    }

    /// A shared handle, e.g. for a server.
    pub fn shared(&self) -> Arc<JournaledStore> {
        Arc::clone(&self.store)
    }

    fn open_in(dir: &Path) -> JournaledStore {
        let config = StoreConfig::default().with_sync_on_write(false);
        JournaledStore::open(&dir.join("store"), &config).expect("Failed to open file store")
    }
}

impl std::ops::Deref for TestStore {
    type Target = JournaledStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// The user most tests act as.
pub fn test_user() -> UserId {
    UserId::new("user-1")
}

/// A valid expense owned by [`test_user`], stamped at 1 second.
pub fn sample_transaction(id: &str, amount: f64) -> Transaction {
    let mut tx = Transaction::new(RecordId::new(id), amount, "Food", "2026-01-15");
    tx.user_id = test_user();
    tx.created_at = Timestamp::from_millis(1_000);
    tx.updated_at = Timestamp::from_millis(1_000);
    tx
}

/// A valid loan owned by [`test_user`] with an unpaid schedule.
pub fn sample_loan(id: &str, principal: f64, months: u32) -> Loan {
    let rate = 12.0;
    let emi = amortization::calculate_emi(principal, rate, months);
    Loan {
        id: RecordId::new(id),
        user_id: test_user(),
        name: format!("Loan {id}"),
        principal,
        interest_rate: rate,
        duration_months: months,
        start_date: "2026-01-01".to_string(),
        emi_amount: emi,
        total_interest: amortization::calculate_total_interest(principal, emi, months),
        payments: amortization::payment_schedule(months),
        created_at: Timestamp::from_millis(1_000),
        updated_at: Timestamp::from_millis(1_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::{EntityStore, Record, RecordType};

    #[test]
    fn memory_store_starts_empty() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        assert_eq!(store.stats().live_transactions, 0);
    }

    #[test]
    fn file_store_survives_reopen() {
        let store = TestStore::file();
        store
            .put(&test_user(), Record::Transaction(sample_transaction("t1", 5.0)))
            .unwrap();

        let store = store.reopen();
        let got = store
            .get(&test_user(), RecordType::Transaction, &RecordId::new("t1"))
            .unwrap();
        assert_eq!(got, Some(Record::Transaction(sample_transaction("t1", 5.0))));
    }

    #[test]
    fn sample_loan_schedule() {
        let loan = sample_loan("l1", 100_000.0, 12);
        assert_eq!(loan.payments.len(), 12);
        assert_eq!(loan.emi_amount, 8884.88);
    }
}

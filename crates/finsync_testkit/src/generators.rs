//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and client batches that
//! pass request validation.

use crate::fixtures::{sample_loan, test_user};
use finsync_core::{Loan, LoanPayment, RecordId, Timestamp, Transaction};
use finsync_sync_protocol::ChangeBatch;
use proptest::prelude::*;

/// Strategy for record IDs drawn from a small pool, so batches collide.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (0u8..8).prop_map(|n| RecordId::new(format!("id-{n}")))
}

/// Strategy for ISO dates in 2026.
pub fn date_strategy() -> impl Strategy<Value = String> {
    (1u32..=12, 1u32..=28).prop_map(|(m, d)| format!("2026-{m:02}-{d:02}"))
}

/// Strategy for client stamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..10_000_000).prop_map(Timestamp::from_millis)
}

/// Strategy for valid transactions.
pub fn transaction_strategy() -> impl Strategy<Value = Transaction> {
    (
        record_id_strategy(),
        1u32..100_000,
        prop::sample::select(vec!["Food", "Rent", "Salary", "Travel"]),
        date_strategy(),
        any::<bool>(),
        timestamp_strategy(),
    )
        .prop_map(|(id, cents, category, date, is_income, stamp)| {
            let mut tx = Transaction::new(id, f64::from(cents) / 100.0, category, date);
            tx.user_id = test_user();
            tx.is_income = is_income;
            tx.created_at = stamp;
            tx.updated_at = stamp;
            tx
        })
}

/// Strategy for valid loans with a partly paid ledger.
pub fn loan_strategy() -> impl Strategy<Value = Loan> {
    (
        record_id_strategy(),
        1u32..=24,
        prop::collection::vec(any::<bool>(), 24),
        timestamp_strategy(),
    )
        .prop_map(|(id, months, paid, stamp)| {
            let mut loan = sample_loan(id.as_str(), 10_000.0, months);
            loan.payments = (1..=months)
                .map(|n| LoanPayment {
                    month_number: n,
                    is_paid: paid[n as usize - 1],
                    paid_date: paid[n as usize - 1].then_some(stamp),
                })
                .collect();
            loan.created_at = stamp;
            loan.updated_at = stamp;
            loan
        })
}

/// Strategy for a client's transaction batch.
pub fn transaction_batch_strategy(max_len: usize) -> impl Strategy<Value = ChangeBatch<Transaction>> {
    (
        prop::collection::vec(transaction_strategy(), 0..=max_len),
        prop::collection::vec(transaction_strategy(), 0..=max_len),
        prop::collection::vec(record_id_strategy(), 0..=max_len),
    )
        .prop_map(|(new, updated, deleted)| ChangeBatch {
            new,
            updated,
            deleted,
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

//! # finsync core
//!
//! Record model and server-side storage for finsync.
//!
//! This crate provides:
//! - Identifiers, timestamps and cursors ([`UserId`], [`RecordId`], [`Timestamp`])
//! - The synced record types ([`Transaction`], [`Loan`], [`LoanPayment`])
//! - A monotonic [`Clock`] and a [`ManualClock`] for tests
//! - The Entity Store and Tombstone Log contracts ([`EntityStore`], [`TombstoneLog`])
//! - An in-memory store and a journaled, crash-recoverable store
//! - Tombstone retention and loan amortization helpers
//!
//! ## Example
//!
//! ```rust
//! use finsync_core::{
//!     EntityStore, MemoryStore, Presence, Record, RecordId, RecordType, Timestamp, Transaction,
//!     UserId,
//! };
//!
//! let store = MemoryStore::new();
//! let user = UserId::new("u1");
//! let mut tx = Transaction::new(RecordId::new("t1"), 500.0, "Food", "2026-01-15");
//! tx.user_id = user.clone();
//! tx.updated_at = Timestamp::from_millis(1_000);
//!
//! store.put(&user, Record::Transaction(tx)).unwrap();
//! assert_eq!(
//!     store.presence(&user, RecordType::Transaction, &RecordId::new("t1")).unwrap(),
//!     Presence::Live
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod amortization;
mod clock;
mod config;
mod error;
mod record;
mod retention;
pub mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use record::{Loan, LoanPayment, Record, SyncRecord, Transaction};
pub use retention::RetentionPolicy;
pub use store::{
    CompactionReport, EntityStore, JournalEntry, JournalScan, JournaledStore, MemoryStore,
    Presence, StoreDir, StoreStats, SyncStore, Tombstone, TombstoneLog,
};
pub use types::{Cursor, RecordId, RecordType, Timestamp, UserId};

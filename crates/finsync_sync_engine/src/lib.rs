//! # finsync Sync Engine
//!
//! Client side of finsync's last-write-wins sync.
//!
//! This crate provides:
//! - A local replica with a pending-change queue and persisted cursors
//! - A sync state machine (idle → syncing → synced | error)
//! - Retry with exponential backoff
//! - Transport abstraction with HTTP, loopback and mock implementations
//! - Periodic background sync on tokio
//!
//! ## Sync cycle
//!
//! One request does both directions:
//! 1. Snapshot the pending queue and the cursor
//! 2. `POST /api/sync`
//! 3. Under one lock: clear what was sent (unless edited since), merge the
//!    server delta, adopt `syncTimestamp` as the new cursor
//!
//! A failed or cancelled cycle changes nothing locally. Retrying resends the
//! same cursor and the server applies the batch idempotently.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod http;
mod replica;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient};
pub use replica::{ChangeKind, LocalReplica, MergeSummary, PreparedSync};
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockTransport, SyncTransport};

//! # finsync Sync Protocol
//!
//! Wire types for the finsync sync protocol.
//!
//! This crate provides:
//! - [`SyncRequest`] / [`SyncResponse`] for the bidirectional sync endpoint
//! - [`PullResponse`] for the pull-only endpoints
//! - Bodies of the direct record endpoints ([`NewTransaction`], [`NewLoan`], ...)
//! - Request validation (whole-batch, all problems reported at once)
//! - A transport-neutral request/response envelope ([`ApiRequest`], [`ApiResponse`])
//!   and the [`ApiHandler`] trait servers implement
//!
//! All bodies are JSON with camelCase keys. Timestamps are RFC 3339 strings.
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use finsync_sync_protocol::{SyncRequest, ChangeBatch};
//! use finsync_core::{RecordId, Timestamp, Transaction};
//!
//! let mut request = SyncRequest::new(Timestamp::EPOCH);
//! let mut batch = ChangeBatch::default();
//! batch.new.push(Transaction::new(RecordId::new("t1"), 500.0, "Food", "2026-01-15"));
//! request.changes.transactions = Some(batch);
//!
//! let json = serde_json::to_string(&request).unwrap();
//! assert!(json.contains("\"lastSyncTimestamp\":\"1970-01-01T00:00:00.000Z\""));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod api;
mod error;
mod messages;
mod requests;
mod validation;

pub use api::{paths, ApiHandler, ApiRequest, ApiResponse, ErrorBody, Method};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChangeBatch, ClientChanges, Delta, PullResponse, ServerChanges, SyncRequest, SyncResponse,
};
pub use requests::{
    DeleteAck, LoanBody, LoanList, NewLoan, NewTransaction, PayInstallment, TransactionBody,
    TransactionList,
};
pub use validation::{validate_loan, validate_sync_request, validate_transaction};

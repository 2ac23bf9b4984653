//! # finsync Sync Server
//!
//! Last-write-wins sync server for finsync transactions and loans.
//!
//! This crate provides:
//! - The Reconciler behind `POST /api/sync`: applies a client's creates,
//!   updates and deletes, then returns everything the client has not seen
//! - The Delta Extractor behind the pull-only endpoints
//! - Direct record endpoints (list, create, update, delete, pay installment)
//! - Authentication (HMAC-SHA256 bearer tokens, or any [`Authenticator`])
//! - Tombstone pruning with a full-resync fallback for stale cursors
//!
//! # Architecture
//!
//! The server is transport-agnostic. [`SyncServer`] implements
//! [`finsync_sync_protocol::ApiHandler`]; an HTTP front end, or the client
//! engine's loopback transport, feeds it [`finsync_sync_protocol::ApiRequest`]s.
//! All state lives in a [`finsync_core::SyncStore`], and every stamp comes
//! from one [`finsync_core::Clock`].
//!
//! # Authentication
//!
//! ```rust
//! use finsync_core::{MemoryStore, UserId};
//! use finsync_sync_server::{ServerConfig, SyncServer};
//! use std::sync::Arc;
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret);
//! let server = SyncServer::new(config, Arc::new(MemoryStore::new()));
//!
//! let token = server.issue_token(&UserId::new("u1"));
//! assert!(token.is_some());
//! ```
//!
//! A server with neither a secret nor an installed authenticator rejects
//! every request.
//!
//! # Protocol
//!
//! 1. Client sends its cursor and its queued changes
//! 2. Server applies creates, then updates, then deletes
//! 3. Server answers with a new cursor and the delta since the old one
//! 4. Client merges the delta and adopts the new cursor

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod extractor;
mod handler;
mod reconciler;
mod routes;
mod server;

pub use auth::{
    AuthConfig, Authenticator, Credentials, Principal, RejectAll, StaticAuthenticator,
    TokenAuthenticator, SESSION_COOKIE,
};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use extractor::DeltaExtractor;
pub use handler::{HandlerContext, RequestHandler};
pub use reconciler::{ReconcileStats, Reconciler};
pub use routes::Route;
pub use server::{spawn_maintenance, SyncServer};

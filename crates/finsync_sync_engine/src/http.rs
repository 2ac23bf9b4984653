//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (or none, for in-process tests) can carry the JSON envelope.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use finsync_core::{Cursor, Loan, RecordType, Transaction};
use finsync_sync_protocol::{
    paths, ApiHandler, ApiRequest, ApiResponse, Delta, Method, PullResponse, ServerChanges,
    SyncRequest, SyncResponse,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client abstraction.
///
/// Implementations send `request` to `base_url` + `request.path`. An `Err`
/// means nothing usable came back (connection refused, timeout); any HTTP
/// status, including errors, is an `Ok` response.
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    fn send(&self, base_url: &str, request: ApiRequest, timeout: Duration) -> Result<ApiResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport speaking the JSON wire format.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the config's URL, token and timeout.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self {
            token: config.token.clone(),
            timeout: config.timeout,
            ..Self::new(config.server_url.clone(), client)
        }
    }

    /// Sends `token` as a bearer credential.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the per-request timeout handed to the client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn send(&self, request: ApiRequest) -> SyncResult<ApiResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let request = match &self.token {
            Some(token) => request.with_bearer(token),
            None => request,
        };

        let response = self
            .client
            .send(&self.base_url, request, self.timeout)
            .map_err(|e| {
                *self.last_error.write() = Some(e.clone());
                SyncError::transport_retryable(e)
            })?;
        *self.last_error.write() = None;

        if response.is_success() {
            Ok(response)
        } else {
            Err(SyncError::from_response(&response))
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let response = self.send(ApiRequest::json(Method::Post, paths::SYNC, request)?)?;
        Ok(response.parse_json()?)
    }

    fn pull(&self, record_type: RecordType, cursor: Cursor) -> SyncResult<SyncResponse> {
        let response = self.send(ApiRequest::pull(record_type, cursor))?;
        let mut changes = ServerChanges::default();
        let (sync_timestamp, full_resync) = match record_type {
            RecordType::Transaction => {
                let pulled: PullResponse<Transaction> = response.parse_json()?;
                changes.set_transactions(Delta {
                    records: pulled.records,
                    deleted: pulled.deleted,
                });
                (pulled.sync_timestamp, pulled.full_resync)
            }
            RecordType::Loan => {
                let pulled: PullResponse<Loan> = response.parse_json()?;
                changes.set_loans(Delta {
                    records: pulled.records,
                    deleted: pulled.deleted,
                });
                (pulled.sync_timestamp, pulled.full_resync)
            }
        };
        Ok(SyncResponse {
            sync_timestamp,
            changes,
            full_resync,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// An HTTP client that hands requests straight to an in-process handler.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: ApiHandler + ?Sized> {
    server: Arc<S>,
}

impl<S: ApiHandler + ?Sized> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: Arc<S>) -> Self {
        Self { server }
    }
}

impl<S: ApiHandler + ?Sized> Clone for LoopbackClient<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

impl<S: ApiHandler + ?Sized> HttpClient for LoopbackClient<S> {
    fn send(&self, _base_url: &str, request: ApiRequest, _timeout: Duration) -> Result<ApiResponse, String> {
        Ok(self.server.handle(request))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_core::{RecordId, Timestamp};
    use serde_json::json;

    struct TestClient {
        response: RwLock<Option<ApiResponse>>,
        seen: RwLock<Vec<ApiRequest>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                seen: RwLock::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, response: ApiResponse) {
            *self.response.write() = Some(response);
        }
    }

    impl HttpClient for &TestClient {
        fn send(&self, _base_url: &str, request: ApiRequest, _timeout: Duration) -> Result<ApiResponse, String> {
            self.seen.write().push(request);
            self.response.read().clone().ok_or_else(|| "connection refused".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_creation() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://finance.example.com", &client);
        assert_eq!(transport.base_url(), "https://finance.example.com");
        assert!(transport.is_connected());

        client.healthy.store(false, Ordering::SeqCst);
        assert!(!transport.is_connected());
    }

    #[test]
    fn closed_transport_refuses() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://finance.example.com", &client);
        transport.close().unwrap();

        let result = transport.sync(&SyncRequest::new(Timestamp::EPOCH));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn connection_failure_is_retryable() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://finance.example.com", &client);

        let err = transport.sync(&SyncRequest::new(Timestamp::EPOCH)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn sends_bearer_and_parses_sync() {
        let client = TestClient::new();
        client.set_response(ApiResponse::json(
            200,
            &json!({ "syncTimestamp": "2026-01-15T10:00:00.000Z", "changes": { "transactions": [], "deletedTransactions": [] } }),
        ));
        let transport = HttpTransport::new("https://finance.example.com", &client).with_token("tok");

        let response = transport.sync(&SyncRequest::new(Timestamp::EPOCH)).unwrap();
        assert_eq!(response.changes.transactions, Some(Vec::new()));

        let seen = client.seen.read();
        assert_eq!(seen[0].path, paths::SYNC);
        assert_eq!(seen[0].bearer_token(), Some("tok"));
    }

    #[test]
    fn pull_is_reshaped_as_sync_response() {
        let client = TestClient::new();
        client.set_response(ApiResponse::json(
            200,
            &json!({ "records": [], "deleted": ["l1"], "syncTimestamp": "2026-01-15T10:00:00.000Z" }),
        ));
        let transport = HttpTransport::new("https://finance.example.com", &client);

        let response = transport.pull(RecordType::Loan, Timestamp::EPOCH).unwrap();
        assert_eq!(response.changes.deleted_loans, Some(vec![RecordId::new("l1")]));
        assert!(response.changes.transactions.is_none());
    }

    #[test]
    fn error_statuses_are_classified() {
        let client = TestClient::new();
        client.set_response(ApiResponse::error(401, "Unauthorized", Vec::new()));
        let transport = HttpTransport::new("https://finance.example.com", &client);

        let err = transport.sync(&SyncRequest::new(Timestamp::EPOCH)).unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert!(!err.is_retryable());
    }
}

//! Transport-neutral request/response envelope.
//!
//! Servers implement [`ApiHandler`]; an HTTP binding (or an in-process
//! loopback) only has to move method, path, headers and body in and status
//! and body out.

use crate::error::{ProtocolError, ProtocolResult};
use finsync_core::RecordType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Endpoint paths.
pub mod paths {
    use finsync_core::{RecordId, RecordType};

    /// Bidirectional sync.
    pub const SYNC: &str = "/api/sync";

    /// Collection endpoint: `/api/transactions` or `/api/loans`.
    #[must_use]
    pub fn collection(record_type: RecordType) -> String {
        format!("/api/{}", record_type.collection())
    }

    /// Single record endpoint: `/api/<type>/<id>`.
    #[must_use]
    pub fn record(record_type: RecordType, id: &RecordId) -> String {
        format!("/api/{}/{}", record_type.collection(), super::encode_component(id.as_str()))
    }

    /// Pull-only endpoint, without the query string.
    #[must_use]
    pub fn pull(record_type: RecordType) -> String {
        format!("/api/{}/sync", record_type.collection())
    }

    /// Installment payment endpoint.
    #[must_use]
    pub fn pay(loan_id: &RecordId) -> String {
        format!("/api/loans/{}/pay", super::encode_component(loan_id.as_str()))
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// A request as seen by an [`ApiHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path, optionally followed by `?query`.
    pub path: String,
    /// Header name/value pairs; names compare case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// `GET path`
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `DELETE path`
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// A request whose body is `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn json<T: Serialize>(
        method: Method,
        path: impl Into<String>,
        value: &T,
    ) -> ProtocolResult<Self> {
        let mut request = Self::new(method, path);
        request.body = serde_json::to_vec(value)?;
        Ok(request.with_header("content-type", "application/json"))
    }

    /// The pull-only request for `record_type` since `cursor`.
    #[must_use]
    pub fn pull(record_type: RecordType, cursor: finsync_core::Cursor) -> Self {
        Self::get(format!(
            "{}?lastSync={}",
            paths::pull(record_type),
            encode_component(&cursor.to_rfc3339())
        ))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds `Authorization: Bearer <token>`.
    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("authorization", format!("Bearer {token}"))
    }

    /// First value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The bearer token from the `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim())
            .filter(|t| !t.is_empty())
    }

    /// A cookie value from the `Cookie` header.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// The path without the query string, split into non-empty,
    /// percent-decoded segments.
    #[must_use]
    pub fn segments(&self) -> Vec<String> {
        let path = self.path.split('?').next().unwrap_or_default();
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| decode_component(s).unwrap_or_else(|| s.to_string()))
            .collect()
    }

    /// A query parameter, percent-decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Query`] for a malformed escape.
    pub fn query_param(&self, name: &str) -> ProtocolResult<Option<String>> {
        let Some((_, query)) = self.path.split_once('?') else {
            return Ok(None);
        };
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key == name {
                return decode_component(value)
                    .map(Some)
                    .ok_or_else(|| ProtocolError::Query {
                        name: name.to_string(),
                        message: "bad percent-encoding".to_string(),
                    });
            }
        }
        Ok(None)
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body does not match `T`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Public error message.
    pub error: String,
    /// Per-field problems, for validation failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// A response produced by an [`ApiHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// A response carrying `value` as JSON.
    ///
    /// Falls back to a 500 error body if `value` cannot be serialized.
    #[must_use]
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(_) => Self::error(500, "Internal server error", Vec::new()),
        }
    }

    /// An error response.
    #[must_use]
    pub fn error(status: u16, message: impl Into<String>, details: Vec<String>) -> Self {
        let body = ErrorBody {
            error: message.into(),
            details,
        };
        Self {
            status,
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body does not match `T`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decodes the body as an [`ErrorBody`], if it is one.
    #[must_use]
    pub fn error_body(&self) -> Option<ErrorBody> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Something that answers API requests: the sync server, or a test double.
pub trait ApiHandler: Send + Sync {
    /// Handles one request. Errors are expressed as non-2xx responses.
    fn handle(&self, request: ApiRequest) -> ApiResponse;
}

impl<H: ApiHandler + ?Sized> ApiHandler for Arc<H> {
    fn handle(&self, request: ApiRequest) -> ApiResponse {
        (**self).handle(request)
    }
}

fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn decode_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = value.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

//! Authentication.
//!
//! The sync engine only needs `authenticate(credentials) -> principal`.
//! Password checks and account management live elsewhere.
//!
//! ## Token Format
//!
//! [`TokenAuthenticator`] issues self-contained bearer tokens:
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - N bytes: user ID (UTF-8)
//! - 32 bytes: HMAC-SHA256 signature over the above
//!
//! base64url-encoded without padding for transport.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use finsync_core::{Clock, SystemClock, Timestamp, UserId};
use finsync_sync_protocol::ApiRequest;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const STAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;

/// Name of the cookie that may carry the token.
pub const SESSION_COOKIE: &str = "session";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The user every operation is scoped to.
    pub user_id: UserId,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Credentials presented with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Token from `Authorization: Bearer`.
    pub bearer: Option<String>,
    /// Token from the session cookie.
    pub session: Option<String>,
}

impl Credentials {
    /// Extracts credentials from request headers.
    #[must_use]
    pub fn from_request(request: &ApiRequest) -> Self {
        Self {
            bearer: request.bearer_token().map(str::to_string),
            session: request.cookie(SESSION_COOKIE).map(str::to_string),
        }
    }

    /// Bearer credentials.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            session: None,
        }
    }

    /// The token to check: the bearer token, else the session cookie.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.bearer.as_deref().or(self.session.as_deref())
    }
}

/// Resolves credentials to a principal.
pub trait Authenticator: Send + Sync {
    /// Returns the principal, or `None` if the credentials are missing or invalid.
    fn authenticate(&self, credentials: &Credentials) -> Option<Principal>;
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates an auth configuration with a 30 day token lifetime.
    #[must_use]
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks HMAC-SHA256 signed, expiring bearer tokens.
#[derive(Clone)]
pub struct TokenAuthenticator {
    config: AuthConfig,
    clock: Arc<dyn Clock>,
}

impl TokenAuthenticator {
    /// Creates an authenticator on the system clock.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates an authenticator on the given clock.
    #[must_use]
    pub fn with_clock(config: AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Issues a token for `user`.
    #[must_use]
    pub fn issue_token(&self, user: &UserId) -> String {
        let issued = self.clock.now().as_millis();

        let mut token = Vec::with_capacity(STAMP_LEN + user.as_str().len() + SIGNATURE_LEN);
        token.extend_from_slice(&issued.to_be_bytes());
        token.extend_from_slice(user.as_str().as_bytes());
        let signature = self.mac(&token).finalize().into_bytes();
        token.extend_from_slice(&signature);

        URL_SAFE_NO_PAD.encode(token)
    }

    /// Checks a token and returns the user it was issued to.
    #[must_use]
    pub fn verify_token(&self, token: &str) -> Option<UserId> {
        let raw = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        if raw.len() <= STAMP_LEN + SIGNATURE_LEN {
            return None;
        }
        let (data, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);
        self.mac(data).verify_slice(signature).ok()?;

        let mut stamp = [0u8; STAMP_LEN];
        stamp.copy_from_slice(&data[..STAMP_LEN]);
        let issued = Timestamp::from_millis(i64::from_be_bytes(stamp));
        if self.clock.now() > issued.saturating_add(self.config.token_expiry) {
            tracing::debug!("expired token");
            return None;
        }

        let user = std::str::from_utf8(&data[STAMP_LEN..]).ok()?;
        Some(UserId::new(user))
    }

    #[allow(clippy::expect_used)]
    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.config.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Option<Principal> {
        let token = credentials.token()?;
        self.verify_token(token).map(Principal::new)
    }
}

/// Fixed token-to-user table, for tests and local development.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticAuthenticator {
    /// Creates an authenticator that admits nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `token` as `user`.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>, user: UserId) -> Self {
        self.insert(token, user);
        self
    }

    /// Admits `token` as `user`.
    pub fn insert(&self, token: impl Into<String>, user: UserId) {
        self.tokens.write().insert(token.into(), user);
    }

    /// Stops admitting `token`.
    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Option<Principal> {
        let token = credentials.token()?;
        self.tokens.read().get(token).cloned().map(Principal::new)
    }
}

/// Admits nobody. Installed when the server has no token secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl Authenticator for RejectAll {
    fn authenticate(&self, _credentials: &Credentials) -> Option<Principal> {
        None
    }
}

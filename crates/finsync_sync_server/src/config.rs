//! Server configuration.

use finsync_core::{RecordType, RetentionPolicy};
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Most records plus deleted IDs accepted in one sync call.
    pub max_batch_records: usize,
    /// Record types this server syncs.
    pub record_types: Vec<RecordType>,
    /// Secret for HMAC bearer tokens. Without one, only an explicitly
    /// installed authenticator can admit requests.
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens.
    pub token_expiry: Duration,
    /// How long tombstones are kept.
    pub tombstone_retention: RetentionPolicy,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_batch_records: 1_000,
            record_types: RecordType::ALL.to_vec(),
            auth_secret: None,
            token_expiry: Duration::from_secs(30 * 24 * 60 * 60),
            tombstone_retention: RetentionPolicy::keep_forever(),
        }
    }

    /// Sets the sync batch limit.
    #[must_use]
    pub fn with_max_batch_records(mut self, max: usize) -> Self {
        self.max_batch_records = max;
        self
    }

    /// Restricts the synced record types.
    #[must_use]
    pub fn with_record_types(mut self, types: impl IntoIterator<Item = RecordType>) -> Self {
        self.record_types = types.into_iter().collect();
        self
    }

    /// Enables HMAC bearer tokens with the given secret.
    #[must_use]
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Prunes tombstones older than `max_age` during maintenance.
    #[must_use]
    pub fn with_tombstone_retention(mut self, max_age: Duration) -> Self {
        self.tombstone_retention = RetentionPolicy::max_age(max_age);
        self
    }

    /// Returns true if `record_type` is synced by this server.
    #[must_use]
    pub fn syncs(&self, record_type: RecordType) -> bool {
        self.record_types.contains(&record_type)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

//! Store configuration.

use crate::retention::RetentionPolicy;
use std::time::Duration;

/// Configuration for opening a journaled store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the journal after every append (safer but slower).
    pub sync_on_write: bool,

    /// How long tombstones are kept.
    pub retention: RetentionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            retention: RetentionPolicy::keep_forever(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn with_create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync after every journal append.
    #[must_use]
    pub const fn with_sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Prunes tombstones older than `max_age` when maintenance runs.
    #[must_use]
    pub fn with_tombstone_retention(mut self, max_age: Duration) -> Self {
        self.retention = RetentionPolicy::max_age(max_age);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_everything_and_sync() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_write);
        assert_eq!(config.retention, RetentionPolicy::keep_forever());
    }

    #[test]
    fn builder_chain() {
        let config = StoreConfig::new()
            .with_create_if_missing(false)
            .with_sync_on_write(false)
            .with_tombstone_retention(Duration::from_secs(3600));
        assert!(!config.create_if_missing);
        assert!(!config.sync_on_write);
        assert_eq!(config.retention.max_age, Some(Duration::from_secs(3600)));
    }
}

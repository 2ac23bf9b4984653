//! Tombstone retention.
//!
//! Tombstones let the change feed tell clients about deletions. Pruning
//! them bounds the tombstone log, at the cost that a client whose cursor
//! predates the pruning watermark must be sent a full resync instead of a
//! delta.

use crate::types::Timestamp;
use std::time::Duration;

/// How long tombstones are kept before they may be pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Maximum tombstone age. `None` keeps tombstones forever.
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// Never prune.
    #[must_use]
    pub const fn keep_forever() -> Self {
        Self { max_age: None }
    }

    /// Prune tombstones older than `max_age`.
    #[must_use]
    pub const fn max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
        }
    }

    /// Returns the pruning horizon at `now`: tombstones deleted strictly
    /// before it may be dropped. `None` when nothing is ever pruned.
    #[must_use]
    pub fn horizon(&self, now: Timestamp) -> Option<Timestamp> {
        self.max_age.map(|age| now.saturating_sub(age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_forever_has_no_horizon() {
        assert_eq!(
            RetentionPolicy::keep_forever().horizon(Timestamp::from_millis(1_000)),
            None
        );
    }

    #[test]
    fn horizon_is_now_minus_age() {
        let policy = RetentionPolicy::max_age(Duration::from_secs(60));
        assert_eq!(
            policy.horizon(Timestamp::from_millis(100_000)),
            Some(Timestamp::from_millis(40_000))
        );
    }
}

//! Prune-tombstones command implementation.

use super::open_existing;
use finsync_core::{Clock, SystemClock, Timestamp, TombstoneLog};
use std::path::Path;
use std::time::Duration;

/// Where pruning stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Tombstones older than this, measured from now.
    OlderThan(Duration),
    /// Tombstones deleted before this instant.
    Before(Timestamp),
}

impl Horizon {
    /// The instant tombstones must predate to be dropped.
    pub fn resolve(self, now: Timestamp) -> Timestamp {
        match self {
            Horizon::OlderThan(age) => now.saturating_sub(age),
            Horizon::Before(at) => at,
        }
    }
}

/// Drops tombstones before `horizon`, returning how many went.
pub fn prune(path: &Path, horizon: Timestamp) -> Result<usize, Box<dyn std::error::Error>> {
    let store = open_existing(path)?;
    Ok(store.prune_before(horizon)?)
}

/// Runs the prune-tombstones command.
pub fn run(path: &Path, horizon: Horizon) -> Result<(), Box<dyn std::error::Error>> {
    let horizon = horizon.resolve(SystemClock::new().now());
    let dropped = prune(path, horizon)?;
    println!("Pruned {dropped} tombstone(s) deleted before {horizon}");
    println!("Clients with an older cursor will receive a full resync.");
    Ok(())
}

//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::replica::{LocalReplica, MergeSummary};
use crate::transport::SyncTransport;
use finsync_core::{Cursor, RecordType};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// A sync or pull request is in flight.
    Syncing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before the next attempt.
    RetryWait,
}

impl SyncState {
    /// Returns true if a request is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns true if the engine can start a new cycle.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync and pull cycles.
    pub cycles_completed: u64,
    /// Records and IDs pushed.
    pub changes_pushed: u64,
    /// Server records written locally.
    pub records_applied: u64,
    /// Local records dropped by server deletions or resyncs.
    pub records_removed: u64,
    /// Full resyncs received.
    pub full_resyncs: u64,
    /// Retries performed.
    pub retries: u64,
    /// Last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync or pull cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Records and IDs pushed.
    pub pushed: usize,
    /// What the server delta did locally.
    pub merged: MergeSummary,
    /// The cursor adopted.
    pub cursor: Cursor,
    /// The server asked for a full resync.
    pub full_resync: bool,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Drives a [`LocalReplica`] against a server through a [`SyncTransport`].
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    replica: Arc<LocalReplica>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    stopped: AtomicBool,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, replica: Arc<LocalReplica>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            replica,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The replica this engine syncs.
    pub fn replica(&self) -> &Arc<LocalReplica> {
        &self.replica
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the cycle in flight. Its response, if one arrives, is discarded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn begin(&self, operation: &str) -> SyncResult<Instant> {
        let state = self.state();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: operation.into(),
            });
        }
        self.reset_cancel();
        self.set_state(SyncState::Syncing);
        Ok(Instant::now())
    }

    /// Runs one sync cycle: push pending changes, merge the server delta,
    /// adopt the new cursor.
    ///
    /// # Errors
    ///
    /// Returns the transport or server error; the replica is left untouched,
    /// so the same changes and cursor go out on the next attempt.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = self.begin("sync")?;
        let prepared = self.replica.prepare_request(&self.config.record_types);
        tracing::debug!(
            cursor = %prepared.request.last_sync_timestamp,
            pushed = prepared.pushed(),
            "sync started"
        );

        let outcome = self
            .transport
            .sync(&prepared.request)
            .and_then(|response| {
                self.check_cancelled()?;
                let merged = self.replica.complete_sync(&prepared, &response)?;
                Ok((response, merged))
            });

        match outcome {
            Ok((response, merged)) => {
                let result = SyncCycleResult {
                    pushed: prepared.pushed(),
                    merged,
                    cursor: response.sync_timestamp,
                    full_resync: response.full_resync,
                    duration: start.elapsed(),
                };
                self.finish(&result);
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Fetches one type's delta without pushing.
    ///
    /// # Errors
    ///
    /// Returns the transport or server error.
    pub fn pull(&self, record_type: RecordType) -> SyncResult<SyncCycleResult> {
        let start = self.begin("pull")?;
        let cursor = self.replica.cursor(record_type);

        let outcome = self
            .transport
            .pull(record_type, cursor)
            .and_then(|response| {
                self.check_cancelled()?;
                let merged = self.replica.complete_pull(&response)?;
                Ok((response, merged))
            });

        match outcome {
            Ok((response, merged)) => {
                let result = SyncCycleResult {
                    pushed: 0,
                    merged,
                    cursor: response.sync_timestamp,
                    full_resync: response.full_resync,
                    duration: start.elapsed(),
                };
                self.finish(&result);
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Syncs, retrying retryable failures with backoff.
    ///
    /// A failed attempt changes nothing locally, so every retry resends the
    /// same cursor.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once
    /// attempts run out.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(attempt, error = %e, "sync failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::Protocol("No sync attempts made".into()))
    }

    fn finish(&self, result: &SyncCycleResult) {
        self.set_state(SyncState::Synced);
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.changes_pushed += result.pushed as u64;
        stats.records_applied += result.merged.applied as u64;
        stats.records_removed += result.merged.removed as u64;
        if result.full_resync {
            stats.full_resyncs += 1;
        }
        stats.last_sync_time = Some(Instant::now());
        stats.last_error = None;
        tracing::info!(
            pushed = result.pushed,
            applied = result.merged.applied,
            removed = result.merged.removed,
            full_resync = result.full_resync,
            cursor = %result.cursor,
            "sync completed"
        );
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
        tracing::warn!(error = %error, "sync failed");
    }

    /// Stops a running [`run_periodic`](Self::run_periodic) loop after its
    /// current cycle.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Syncs every `every` until [`shutdown`](Self::shutdown) is called.
    ///
    /// Cycles run on the blocking pool; failures are logged and the loop
    /// carries on.
    pub async fn run_periodic(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !self.stopped.load(Ordering::SeqCst) {
            interval.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let engine = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || engine.sync_with_retry()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "periodic sync failed"),
                Err(err) => tracing::error!(error = %err, "periodic sync task panicked"),
            }
        }
        tracing::debug!("periodic sync stopped");
    }
}

//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use finsync_core::{Cursor, RecordType};
use finsync_sync_protocol::{SyncRequest, SyncResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
pub trait SyncTransport: Send + Sync {
    /// Sends local changes and receives everything newer than the cursor.
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;

    /// Fetches one type's delta without pushing anything.
    ///
    /// The result is shaped like a sync response carrying only
    /// `record_type`'s keys.
    fn pull(&self, record_type: RecordType, cursor: Cursor) -> SyncResult<SyncResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A scripted transport for testing.
///
/// Responses are queued and consumed in order; every request is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
    pulls: Mutex<Vec<(RecordType, Cursor)>>,
}

impl MockTransport {
    /// Creates a connected mock with no queued responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful response.
    pub fn push_response(&self, response: SyncResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Sync requests received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Pulls received so far.
    pub fn pulls(&self) -> Vec<(RecordType, Cursor)> {
        self.pulls.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn next_response(&self) -> SyncResult<SyncResponse> {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("No mock response queued".into())))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(request.clone());
        self.next_response()
    }

    fn pull(&self, record_type: RecordType, cursor: Cursor) -> SyncResult<SyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pulls.lock().push((record_type, cursor));
        self.next_response()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

//! Pending request tracker
//!
//! One entry per in-flight HTTP round trip. Each entry completes
//! exactly once: with the device's response, with a tunnel error on
//! teardown, or not at all when the waiter times out and removes it.

use dashmap::DashMap;
use editor_tunnel_proto::{HttpResponseFrame, frame::CorrelationId};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::TunnelError;

type Completion = Result<HttpResponseFrame, TunnelError>;

/// Tracks in-flight HTTP requests awaiting device responses
#[derive(Default)]
pub struct PendingRequests {
    requests: DashMap<CorrelationId, oneshot::Sender<Completion>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
        }
    }

    /// Register a new pending request; the receiver resolves when the
    /// response arrives or the tunnel goes away
    pub fn register(&self, id: CorrelationId) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        self.requests.insert(id, tx);
        rx
    }

    /// Complete a pending request
    ///
    /// Returns false when no entry exists for the id, which is how a
    /// late response for a timed-out request gets discarded.
    pub fn respond(&self, id: CorrelationId, completion: Completion) -> bool {
        match self.requests.remove(&id) {
            Some((_, tx)) => tx.send(completion).is_ok(),
            None => {
                debug!(correlation_id = id, "No pending request, discarding response");
                false
            }
        }
    }

    /// Remove an entry without completing it (timeout path)
    pub fn cancel(&self, id: CorrelationId) {
        self.requests.remove(&id);
    }

    /// Fail every outstanding request with the same error (teardown)
    pub fn fail_all(&self, error: TunnelError) {
        let ids: Vec<CorrelationId> = self.requests.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.requests.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.requests.len()
    }
}

//! Offload rendezvous table.
//!
//! Each in-flight offload registers a single-use channel under its request
//! id. The inbound `_responses` handler completes it; everything else -
//! duplicates, late replies after a timeout, replies addressed to another
//! node - misses the table and is dropped without side effects.

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use flockproto::FunctionResponse;

/// Pending offloads keyed by request id.
#[derive(Default)]
pub struct OffloadTable {
    pending: DashMap<Uuid, oneshot::Sender<FunctionResponse>>,
}

impl OffloadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rendezvous for `request_id`. The caller must `remove`
    /// the id on every exit path; completion removes it as well.
    pub fn register(&self, request_id: Uuid) -> oneshot::Receiver<FunctionResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        rx
    }

    /// Drop a pending rendezvous, if still present.
    pub fn remove(&self, request_id: &Uuid) {
        self.pending.remove(request_id);
    }

    /// Deliver a response to its waiting caller. Returns false for an
    /// orphan (unknown or already-completed request id).
    pub fn complete(&self, response: FunctionResponse) -> bool {
        match self.pending.remove(&response.request_id) {
            Some((_, tx)) => {
                // A dropped receiver means the caller already gave up;
                // that is equivalent to a late reply.
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

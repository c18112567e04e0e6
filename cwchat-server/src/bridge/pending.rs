//! In-flight request bookkeeping

use std::collections::HashMap;

use cwchat_protocol::JsonRpcResponse;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::BridgeError;

/// What a pending call resolves to
pub type CallOutcome = Result<JsonRpcResponse, BridgeError>;

struct PendingCall {
    method: String,
    generation: u64,
    deadline: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

/// Id-keyed map of requests awaiting a response
///
/// Every entry is removed exactly once, by whichever of response,
/// worker failure or timeout gets there first.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the receiver for its outcome
    pub fn register(
        &self,
        id: u64,
        method: &str,
        generation: u64,
        deadline: Instant,
    ) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.calls.lock().insert(
            id,
            PendingCall {
                method: method.to_string(),
                generation,
                deadline,
                tx,
            },
        );
        if previous.is_some() {
            warn!(req_id = id, "Replaced a pending call with a reused id");
        }
        rx
    }

    /// Deliver a response to the call with the matching id
    ///
    /// Returns false when no call is waiting for it (late or unknown id).
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.correlation_id() else {
            warn!(id = %response.id, "Dropping worker response without a usable id");
            return false;
        };

        let Some(call) = self.calls.lock().remove(&id) else {
            warn!(req_id = id, "Dropping response for unknown or expired request");
            return false;
        };

        if Instant::now() > call.deadline {
            debug!(req_id = id, method = %call.method, "Response arrived after deadline");
        }

        if call.tx.send(Ok(response)).is_err() {
            debug!(req_id = id, method = %call.method, "Caller went away before response");
        }
        true
    }

    /// Forget a call (after its deadline passed)
    pub fn remove(&self, id: u64) -> bool {
        self.calls.lock().remove(&id).is_some()
    }

    /// Reject every call written to `generation`
    ///
    /// Returns how many calls were failed.
    pub fn fail_generation(&self, generation: u64, reason: &str) -> usize {
        let failed: Vec<(u64, PendingCall)> = {
            let mut calls = self.calls.lock();
            let ids: Vec<u64> = calls
                .iter()
                .filter(|(_, call)| call.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| calls.remove(&id).map(|call| (id, call)))
                .collect()
        };

        for (id, call) in &failed {
            debug!(req_id = id, method = %call.method, generation, "Failing pending call");
        }
        let count = failed.len();
        for (_, call) in failed {
            let _ = call.tx.send(Err(BridgeError::worker_failure(reason)));
        }
        count
    }

    /// Reject everything regardless of generation
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingCall> = self.calls.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(BridgeError::worker_failure(reason)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

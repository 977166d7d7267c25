//! Pending-call registry.
//!
//! One registry per connection plus one per session. Ids come from the
//! connection-wide counter either way; a response routed to a session is
//! looked up only in that session's registry.
//!
//! Resolution is exactly-once by construction: completing a call removes
//! its entry and consumes the oneshot sender, so a late or duplicate
//! response finds nothing to resolve and is dropped silently.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::protocol::Envelope;

// ============================================================================
// PendingCall
// ============================================================================

/// An outstanding command awaiting its response.
struct PendingCall {
    /// Method name, kept for error context.
    method: String,

    /// Single-resolution result slot.
    tx: oneshot::Sender<Result<Value>>,
}

// ============================================================================
// CallRegistry
// ============================================================================

/// Map of outstanding calls keyed by id.
///
/// # Thread Safety
///
/// Inserts happen from arbitrary caller tasks, resolution from the
/// serialized inbound worker, removal-on-timeout from the caller's timer
/// branch; the map is mutex-guarded for exactly that contention.
#[derive(Default)]
pub struct CallRegistry {
    calls: Mutex<FxHashMap<CallId, PendingCall>>,
}

impl CallRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call and returns the receiver for its outcome.
    pub fn register(&self, id: CallId, method: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );
        rx
    }

    /// Resolves a call from its response envelope.
    ///
    /// Returns `false` when no call with that id is registered (late or
    /// duplicate response; dropped silently per protocol).
    pub fn complete(&self, id: CallId, envelope: Envelope) -> bool {
        let Some(call) = self.calls.lock().remove(&id) else {
            trace!(%id, "Response for unknown call dropped");
            return false;
        };

        let outcome = envelope.into_call_result(&call.method);
        let _ = call.tx.send(outcome);
        true
    }

    /// Fails a single call.
    ///
    /// Returns `false` when the call has already resolved.
    pub fn fail(&self, id: CallId, error: Error) -> bool {
        let Some(call) = self.calls.lock().remove(&id) else {
            return false;
        };

        let _ = call.tx.send(Err(error));
        true
    }

    /// Removes a call without resolving it.
    ///
    /// Used on timeout so a late response cannot resolve a caller that
    /// already gave up, and the id is not leaked.
    pub fn forget(&self, id: CallId) -> bool {
        self.calls.lock().remove(&id).is_some()
    }

    /// Fails every outstanding call with `TargetClosed(reason)`.
    ///
    /// The cancellation broadcast used by session/connection close.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut calls = self.calls.lock();
            calls.drain().collect()
        };

        let count = drained.len();
        for (_, call) in drained {
            let _ = call
                .tx
                .send(Err(Error::target_closed(&call.method, reason)));
        }

        if count > 0 {
            debug!(count, reason, "Failed outstanding calls");
        }
    }

    /// Returns the number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns `true` when no call is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Session registry with async population.
//!
//! `Target.attachToTarget`'s response and the matching
//! `Target.attachedToTarget` event race on the wire. Whichever arrives
//! first must make the session locatable by id, so lookups come in two
//! flavors: an immediate `get` and a `wait_for` that resolves the moment
//! the session is registered. Waiting never blocks the inbound worker;
//! it parks the caller on a oneshot that `insert` completes.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::identifiers::SessionId;
use crate::session::Session;

// ============================================================================
// SessionRegistry
// ============================================================================

/// Map of live sessions keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<FxHashMap<SessionId, Session>>,
    waiters: Mutex<FxHashMap<SessionId, Vec<oneshot::Sender<Session>>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and wakes every waiter for its id.
    pub fn insert(&self, session: Session) {
        let id = session.id().clone();
        self.sessions.lock().insert(id.clone(), session.clone());

        let waiters = self.waiters.lock().remove(&id);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(session.clone());
            }
        }
    }

    /// Removes a session by id.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().remove(id)
    }

    /// Immediate lookup.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    /// Resolves as soon as a session with this id is registered.
    ///
    /// Returns `None` when the registry is torn down before the session
    /// appears (connection closed).
    pub async fn wait_for(&self, id: &SessionId) -> Option<Session> {
        let rx = {
            // Single critical section: either the session is already
            // there, or the waiter is parked before insert can run.
            let sessions = self.sessions.lock();
            if let Some(session) = sessions.get(id) {
                return Some(session.clone());
            }

            let (tx, rx) = oneshot::channel();
            self.waiters.lock().entry(id.clone()).or_default().push(tx);
            drop(sessions);
            rx
        };

        rx.await.ok()
    }

    /// Removes every session, dropping all parked waiters.
    pub fn drain(&self) -> Vec<Session> {
        self.waiters.lock().clear();
        let mut sessions = self.sessions.lock();
        sessions.drain().map(|(_, session)| session).collect()
    }

    /// Snapshot of the live sessions.
    #[must_use]
    pub fn values(&self) -> Vec<Session> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` when no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

//! Sessions: per-target sub-channels of a connection.
//!
//! A session is created when the connection observes
//! `Target.attachedToTarget` and closed on `Target.detachedFromTarget` or
//! connection closure. It owns its own pending-call registry: ids still
//! come from the connection-wide counter, so they never collide, but a
//! response routed to this session resolves only calls registered here.
//!
//! Parent/child relations are id lookups through the owning connection,
//! never owning pointers, so session teardown cannot leave cycles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::connection::Connection;
use crate::connection::calls::CallRegistry;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventCallback, EventSubscription, ProtocolEvent};
use crate::identifiers::SessionId;
use crate::protocol::{Envelope, TargetType};

// ============================================================================
// Session
// ============================================================================

/// One attached target's command/event channel.
///
/// Cheap to clone; all clones address the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// Session id assigned by the browser.
    id: SessionId,

    /// Parent session id; `None` for sessions attached at top level.
    parent_id: Option<SessionId>,

    /// Kind of target this session addresses.
    target_type: TargetType,

    /// Back-reference to the owning connection; nulled on close so later
    /// sends fail fast naming the close reason.
    connection: Mutex<Option<Connection>>,

    /// Outstanding calls issued through this session.
    calls: CallRegistry,

    /// Events routed to this session.
    events: EventBus<ProtocolEvent>,

    /// Close reason; `Some` once closed.
    close_reason: Mutex<Option<String>>,

    /// Flipped to `true` on close.
    closed_tx: watch::Sender<bool>,
}

impl Session {
    /// Creates a session bound to its owning connection.
    #[must_use]
    pub(crate) fn new(
        connection: Connection,
        target_type: TargetType,
        id: SessionId,
        parent_id: Option<SessionId>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                id,
                parent_id,
                target_type,
                connection: Mutex::new(Some(connection)),
                calls: CallRegistry::new(),
                events: EventBus::new(),
                close_reason: Mutex::new(None),
                closed_tx,
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Kind of target this session addresses.
    #[inline]
    #[must_use]
    pub fn target_type(&self) -> TargetType {
        self.inner.target_type
    }

    /// Returns `true` once the session has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason.lock().is_some()
    }

    /// Close reason, once closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.inner.close_reason.lock().clone()
    }

    /// Returns `true` while calls issued through this session await
    /// their responses.
    #[inline]
    #[must_use]
    pub fn has_pending_calls(&self) -> bool {
        !self.inner.calls.is_empty()
    }

    /// Resolves the parent session.
    ///
    /// A session with no parent id resolves to itself. So does a session
    /// whose parent is no longer registered (already detached): callers
    /// get a usable session either way, never a dangling reference.
    #[must_use]
    pub fn parent_session(&self) -> Session {
        let Some(parent_id) = &self.inner.parent_id else {
            return self.clone();
        };

        let connection = self.inner.connection.lock().clone();
        connection
            .and_then(|connection| connection.get_session(parent_id))
            .unwrap_or_else(|| self.clone())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a command on this session and awaits the response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the session or connection is closed
    /// - [`Error::Timeout`] if no response arrives within the protocol
    ///   timeout
    /// - [`Error::Protocol`] if the browser reports an error
    /// - [`Error::Message`] if the transport rejects the frame
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_with_timeout(method, params, None).await
    }

    /// Sends a command with an explicit response deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`].
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        call_timeout: Option<Duration>,
    ) -> Result<Value> {
        let connection = self.require_connection(method)?;

        let id = connection.next_call_id();
        let command =
            crate::protocol::Command::for_session(id, method, params, self.inner.id.clone());
        let wire = command.to_wire()?;

        let rx = self.inner.calls.register(id, method);

        if let Err(e) = connection.raw_send(wire).await {
            // Fail the just-registered call; the receive below observes it.
            self.inner.calls.fail(id, Error::message(e.to_string()));
        }

        let deadline = call_timeout.unwrap_or_else(|| connection.protocol_timeout());
        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::target_closed(
                method,
                self.close_reason()
                    .unwrap_or_else(|| "session torn down".to_string()),
            )),
            Err(_) => {
                self.inner.calls.forget(id);
                Err(Error::timeout(method, deadline.as_millis() as u64))
            }
        }
    }

    /// Sends a command and deserializes its result.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`], plus [`Error::Json`] on shape
    /// mismatch.
    pub async fn send_as<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self.send(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a command without registering for a response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the session or connection is closed
    /// - [`Error::Message`] if the transport rejects the frame
    pub async fn send_no_reply(&self, method: &str, params: Option<Value>) -> Result<()> {
        let connection = self.require_connection(method)?;

        let id = connection.next_call_id();
        let command =
            crate::protocol::Command::for_session(id, method, params, self.inner.id.clone());
        connection.raw_send(command.to_wire()?).await
    }

    /// Detaches this session from its target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionDetached`] when the session has no owning
    /// connection left (already closed).
    pub async fn detach(&self) -> Result<()> {
        let connection = self
            .inner
            .connection
            .lock()
            .clone()
            .ok_or_else(|| Error::session_detached(self.inner.target_type.to_string()))?;

        connection
            .send(
                "Target.detachFromTarget",
                Some(json!({ "sessionId": self.inner.id })),
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for events routed to this session.
    ///
    /// Pass `Some(method)` to receive only that event, `None` for all.
    #[must_use]
    pub fn subscribe(
        &self,
        filter: Option<&str>,
        callback: EventCallback<ProtocolEvent>,
    ) -> EventSubscription {
        self.inner.events.subscribe(filter, callback)
    }

    /// Resolves once the session is closed.
    pub async fn wait_close(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the session. Idempotent.
    ///
    /// Fails every pending call with `TargetClosed(reason)`, drops all
    /// event listeners and severs the connection back-reference.
    pub fn close(&self, reason: &str) {
        {
            let mut close_reason = self.inner.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason.to_string());
        }

        debug!(session_id = %self.inner.id, reason, "Session closed");

        self.inner.calls.fail_all(reason);
        self.inner.events.clear();
        *self.inner.connection.lock() = None;
        let _ = self.inner.closed_tx.send(true);
    }

    /// Routes an inbound envelope addressed to this session.
    ///
    /// Called from the connection's serialized inbound worker.
    pub(crate) fn handle_message(&self, envelope: Envelope) {
        if let Some(id) = envelope.id {
            self.inner.calls.complete(id, envelope);
        } else if envelope.is_event() {
            let method = envelope.method().to_owned();
            let event = ProtocolEvent::new(method, envelope.params);
            self.inner.events.emit_event(&event);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Connection handle, or the fail-fast close error.
    fn require_connection(&self, method: &str) -> Result<Connection> {
        self.inner.connection.lock().clone().ok_or_else(|| {
            let reason = self
                .close_reason()
                .unwrap_or_else(|| "unknown".to_string());
            Error::target_closed(
                method,
                format!(
                    "Session closed. Most likely the {} has been closed. Close reason: {reason}",
                    self.inner.target_type
                ),
            )
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("target_type", &self.inner.target_type)
            .field("parent_id", &self.inner.parent_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::connection::{Connection, ConnectionOptions};
    use crate::transport::testing::ScriptedTransport;

    async fn test_connection() -> (Connection, Arc<ScriptedTransport>) {
        let (transport, events) = ScriptedTransport::new();
        let connection = Connection::new(
            "ws://test",
            transport.clone(),
            events,
            ConnectionOptions::default(),
        );
        (connection, transport)
    }

    fn attach_frame(session_id: &str) -> String {
        format!(
            r#"{{"method":"Target.attachedToTarget","params":{{"sessionId":"{session_id}","targetInfo":{{"targetId":"T-{session_id}","type":"page","url":"about:blank"}},"waitingForDebugger":false}}}}"#
        )
    }

    #[tokio::test]
    async fn test_send_after_close_fails_fast_without_touching_transport() {
        let (connection, transport) = test_connection().await;
        transport.push(attach_frame("S1"));

        let session = connection
            .wait_for_session(&SessionId::new("S1"))
            .await
            .expect("session attached");

        let sent_before = transport.sent_count();
        session.close("test teardown");

        let err = session
            .send("Page.enable", None)
            .await
            .expect_err("closed session");
        assert!(err.is_target_closed());
        assert!(err.to_string().contains("test teardown"));
        assert_eq!(transport.sent_count(), sent_before);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_keeps_first_reason() {
        let (connection, transport) = test_connection().await;
        transport.push(attach_frame("S1"));

        let session = connection
            .wait_for_session(&SessionId::new("S1"))
            .await
            .expect("session attached");

        session.close("first");
        session.close("second");
        assert_eq!(session.close_reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_parent_session_falls_back_to_self() {
        let (connection, transport) = test_connection().await;
        transport.push(attach_frame("ROOT"));
        let root = connection
            .wait_for_session(&SessionId::new("ROOT"))
            .await
            .expect("session attached");

        // No parent id at all: resolves to itself.
        assert_eq!(root.parent_session().id(), root.id());

        // Child attach tagged with a parent that was never registered:
        // the lookup fails and falls back to the child itself.
        transport.push(
            r#"{"method":"Target.attachedToTarget","params":{"sessionId":"CHILD","targetInfo":{"targetId":"T-CHILD","type":"worker","url":""},"waitingForDebugger":false},"sessionId":"GHOST"}"#,
        );
        let child = connection
            .wait_for_session(&SessionId::new("CHILD"))
            .await
            .expect("child attached");
        assert_eq!(child.parent_session().id(), child.id());
    }

    #[tokio::test]
    async fn test_detach_on_closed_session_errors() {
        let (connection, transport) = test_connection().await;
        transport.push(attach_frame("S1"));

        let session = connection
            .wait_for_session(&SessionId::new("S1"))
            .await
            .expect("session attached");
        session.close("gone");

        let err = session.detach().await.expect_err("no connection");
        assert!(matches!(err, Error::SessionDetached { .. }));
    }

    #[tokio::test]
    async fn test_event_routed_to_session_listeners() {
        let (connection, transport) = test_connection().await;
        transport.push(attach_frame("S1"));

        let session = connection
            .wait_for_session(&SessionId::new("S1"))
            .await
            .expect("session attached");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _guard = session.subscribe(
            Some("Page.frameAttached"),
            Arc::new(move |event: &ProtocolEvent| {
                seen_clone.lock().push(event.params.clone());
            }),
        );

        transport.push(
            r#"{"method":"Page.frameAttached","params":{"frameId":"F1","parentFrameId":"F0"},"sessionId":"S1"}"#,
        );

        // Let the inbound worker drain.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 1);
    }
}

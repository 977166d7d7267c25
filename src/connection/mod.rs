//! Connection: the root protocol multiplexer.
//!
//! One connection owns one transport and turns it into many
//! independently addressable request/response channels (sessions) plus
//! event streams. Outbound commands may be issued concurrently from any
//! task; inbound frames are processed strictly one at a time on a
//! serialized worker, so session-registry and frame-tree mutation is
//! race-free without per-structure locks.
//!
//! # Demultiplexing
//!
//! For each inbound frame, in order:
//!
//! 1. Deserialize; on failure log and drop the frame.
//! 2. `Target.attachedToTarget` → create and register the session.
//! 3. `Target.detachedFromTarget` → remove and close the session.
//! 4. A `sessionId` on the frame routes it to that session (this also
//!    applies to the attach/detach notifications themselves, which is
//!    how a parent session observes its children).
//! 5. Otherwise a response `id` resolves a connection-level call; an
//!    unknown id is a late response and is dropped.
//! 6. Otherwise the frame is a connection-level event.

// ============================================================================
// Submodules
// ============================================================================

/// Pending-call registry.
pub mod calls;

/// Serialized inbound worker.
pub mod queue;

/// Session registry with async population.
pub mod sessions;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, EventCallback, EventSubscription, ProtocolEvent};
use crate::identifiers::{CallId, SessionId, TargetId};
use crate::protocol::{
    AttachToTargetResponse, AttachedToTargetParams, Command, DetachedFromTargetParams, Envelope,
};
use crate::session::Session;
use crate::transport::{Transport, TransportEvent, TransportEvents};

use calls::CallRegistry;
use queue::SerialQueue;
use sessions::SessionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command responses.
const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(180);

/// Default timeout for wait-style operations (frames, contexts,
/// predicates).
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tunables applied to a connection at creation.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Deadline for every command unless overridden per call.
    pub protocol_timeout: Duration,

    /// Default deadline for wait-style operations.
    pub wait_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocol_timeout: DEFAULT_PROTOCOL_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Session lifecycle notification raised by the connection.
#[derive(Clone)]
pub enum SessionEvent {
    /// A session was attached and registered.
    Attached(Session),

    /// A session was detached and closed.
    Detached(Session),
}

impl SessionEvent {
    /// Routing key used on the session-event bus.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attached(_) => "attached",
            Self::Detached(_) => "detached",
        }
    }

    /// The session the event refers to.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        match self {
            Self::Attached(session) | Self::Detached(session) => session,
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Root multiplexer over one transport.
///
/// Cheap to clone; all clones address the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    /// Endpoint the transport dialed, for diagnostics.
    endpoint: String,

    /// The duplex channel.
    transport: Arc<dyn Transport>,

    /// Connection tunables.
    options: ConnectionOptions,

    /// Connection-wide id counter; sessions draw from it too.
    last_id: AtomicU64,

    /// Connection-scoped outstanding calls.
    calls: CallRegistry,

    /// Live sessions.
    sessions: SessionRegistry,

    /// Serialized inbound worker.
    queue: SerialQueue,

    /// Connection-scoped events.
    events: EventBus<ProtocolEvent>,

    /// Session lifecycle notifications.
    session_events: EventBus<SessionEvent>,

    /// Targets attached explicitly rather than by auto-attach.
    manually_attached: Mutex<FxHashSet<TargetId>>,

    /// Close reason; `Some` once closed.
    close_reason: Mutex<Option<String>>,

    /// Flipped to `true` on close.
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Wraps an established transport in a connection.
    ///
    /// Spawns the inbound worker; frames start flowing immediately.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        transport_events: TransportEvents,
        options: ConnectionOptions,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                endpoint: endpoint.into(),
                transport,
                options,
                last_id: AtomicU64::new(0),
                calls: CallRegistry::new(),
                sessions: SessionRegistry::new(),
                queue: SerialQueue::new(),
                events: EventBus::new(),
                session_events: EventBus::new(),
                manually_attached: Mutex::new(FxHashSet::default()),
                close_reason: Mutex::new(None),
                closed_tx,
            }),
        };

        connection.spawn_reader(transport_events);
        connection
    }

    /// Dials a DevTools endpoint and wraps it in a connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] for an invalid URL or handshake failure
    /// - [`Error::ConnectionTimeout`] if the handshake times out
    pub async fn connect(endpoint: &str, options: ConnectionOptions) -> Result<Self> {
        let (transport, events) =
            crate::transport::WebSocketTransport::connect(endpoint).await?;
        Ok(Self::new(endpoint, transport, events, options))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Endpoint this connection dialed.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Returns `true` once the connection has been closed.
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

    /// Returns `true` while connection-scoped calls await responses.
    #[inline]
    #[must_use]
    pub fn has_pending_calls(&self) -> bool {
        !self.inner.calls.is_empty()
    }

    /// Number of connection-scoped calls awaiting responses.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.calls.len()
    }

    /// Immediate session lookup.
    #[must_use]
    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.inner.sessions.get(id)
    }

    /// Snapshot of the live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.values()
    }

    /// Returns `true` unless the target was attached via
    /// [`Connection::create_session`].
    #[must_use]
    pub fn is_auto_attached(&self, target_id: &TargetId) -> bool {
        !self.inner.manually_attached.lock().contains(target_id)
    }

    /// Default deadline for wait-style operations.
    #[inline]
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        self.inner.options.wait_timeout
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a connection-scoped command and awaits the response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the connection is closed
    /// - [`Error::Timeout`] if no response arrives in time
    /// - [`Error::Protocol`] if the browser reports an error
    /// - [`Error::Message`] if the transport rejects the frame
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_with_timeout(method, params, None).await
    }

    /// Sends a connection-scoped command with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        call_timeout: Option<Duration>,
    ) -> Result<Value> {
        self.ensure_open(method)?;

        let id = self.next_call_id();
        let command = Command::new(id, method, params);
        let wire = command.to_wire()?;

        let rx = self.inner.calls.register(id, method);

        if let Err(e) = self.raw_send(wire).await {
            self.inner.calls.fail(id, Error::message(e.to_string()));
        }

        let deadline = call_timeout.unwrap_or(self.inner.options.protocol_timeout);
        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::target_closed(
                method,
                self.close_reason()
                    .unwrap_or_else(|| "connection torn down".to_string()),
            )),
            Err(_) => {
                self.inner.calls.forget(id);
                Err(Error::timeout(method, deadline.as_millis() as u64))
            }
        }
    }

    /// Sends a connection-scoped command and deserializes its result.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`], plus [`Error::Json`] on shape
    /// mismatch.
    pub async fn send_as<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self.send(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a connection-scoped command without awaiting a response.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the connection is closed
    /// - [`Error::Message`] if the transport rejects the frame
    pub async fn send_no_reply(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open(method)?;

        let id = self.next_call_id();
        let command = Command::new(id, method, params);
        self.raw_send(command.to_wire()?).await
    }

    /// Attaches to a target and resolves its session.
    ///
    /// Issues `Target.attachToTarget` with `flatten: true`. The attach
    /// notification and the command response arrive in either order; the
    /// session resolves as soon as both the registry entry exists and
    /// the response named its id.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`], plus [`Error::Timeout`] when the
    /// attach notification never materializes.
    pub async fn create_session(
        &self,
        target_id: &TargetId,
        is_auto_attach_emulated: bool,
    ) -> Result<Session> {
        if !is_auto_attach_emulated {
            self.inner
                .manually_attached
                .lock()
                .insert(target_id.clone());
        }

        let response: AttachToTargetResponse = self
            .send_as(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
            )
            .await?;

        self.inner.manually_attached.lock().remove(target_id);

        self.wait_for_session(&response.session_id).await
    }

    /// Resolves a session by id, waiting for its attach notification if
    /// it has not been processed yet.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] when the connection closes first
    /// - [`Error::Timeout`] when the session never appears
    pub async fn wait_for_session(&self, id: &SessionId) -> Result<Session> {
        let deadline = self.inner.options.protocol_timeout;
        match timeout(deadline, self.inner.sessions.wait_for(id)).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(Error::target_closed(
                "Target.attachToTarget",
                self.close_reason()
                    .unwrap_or_else(|| "connection torn down".to_string()),
            )),
            Err(_) => Err(Error::timeout(
                "Target.attachToTarget",
                deadline.as_millis() as u64,
            )),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for connection-scoped events.
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

    /// Registers a listener for session attach/detach notifications.
    ///
    /// Pass `Some("attached")` / `Some("detached")` to filter, `None`
    /// for both.
    #[must_use]
    pub fn subscribe_sessions(
        &self,
        filter: Option<&str>,
        callback: EventCallback<SessionEvent>,
    ) -> EventSubscription {
        self.inner.session_events.subscribe(filter, callback)
    }

    /// Resolves once the connection is closed.
    pub async fn wait_close(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the connection. Idempotent and safe to call re-entrantly.
    ///
    /// Stops the inbound worker and the transport reads, closes every
    /// session (failing the session's calls first), then fails every
    /// connection-scoped call with `TargetClosed(reason)`.
    pub fn close(&self, reason: &str) {
        {
            let mut close_reason = self.inner.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason.to_string());
        }

        debug!(endpoint = %self.inner.endpoint, reason, "Connection closed");

        self.inner.queue.close();
        self.inner.transport.stop_reading();

        // Sessions first: child calls always fail before the
        // connection-level calls are cleared.
        for session in self.inner.sessions.drain() {
            session.close(reason);
        }

        self.inner.calls.fail_all(reason);
        self.inner.events.clear();
        self.inner.session_events.clear();
        let _ = self.inner.closed_tx.send(true);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Allocates a fresh call id.
    pub(crate) fn next_call_id(&self) -> CallId {
        CallId::new(self.inner.last_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Writes one serialized command to the transport.
    pub(crate) async fn raw_send(&self, wire: String) -> Result<()> {
        trace!(frame = %wire, "Send ►");
        self.inner.transport.send_text(wire).await
    }

    /// Default deadline for command responses.
    pub(crate) fn protocol_timeout(&self) -> Duration {
        self.inner.options.protocol_timeout
    }

    /// Fails fast when the connection is already closed.
    fn ensure_open(&self, method: &str) -> Result<()> {
        match self.inner.close_reason.lock().as_ref() {
            Some(reason) => Err(Error::target_closed(method, reason.clone())),
            None => Ok(()),
        }
    }

    /// Spawns the task feeding transport events into the serialized
    /// worker.
    fn spawn_reader(&self, mut transport_events: TransportEvents) {
        let connection = self.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                match event {
                    TransportEvent::Message(text) => {
                        let handler = connection.clone();
                        connection
                            .inner
                            .queue
                            .enqueue(async move { handler.process_frame(&text) });
                    }
                    TransportEvent::Closed(reason) => {
                        connection.close(&reason);
                        break;
                    }
                }
            }
            debug!("Connection reader terminated");
        });
    }

    /// Processes one inbound frame. Runs on the serialized worker.
    ///
    /// A frame that fails to parse, or a handler that errors on it, is
    /// logged and dropped; only the implicated call or session is
    /// affected, never the read loop.
    fn process_frame(&self, text: &str) {
        let envelope = match Envelope::from_wire(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, frame = %text, "Failed to deserialize frame");
                return;
            }
        };

        trace!(frame = %text, "◀ Receive");

        match envelope.method() {
            "Target.attachedToTarget" => match envelope.params_as::<AttachedToTargetParams>() {
                Ok(params) => self.handle_attached(params, envelope.session_id.clone()),
                Err(e) => error!(error = %e, "Malformed attach notification"),
            },
            "Target.detachedFromTarget" => {
                match envelope.params_as::<DetachedFromTargetParams>() {
                    Ok(params) => self.handle_detached(&params),
                    Err(e) => error!(error = %e, "Malformed detach notification"),
                }
            }
            _ => {}
        }

        if let Some(session_id) = &envelope.session_id {
            // Session-scoped frame; this also hands attach/detach
            // notifications to the parent session.
            if let Some(session) = self.inner.sessions.get(session_id) {
                session.handle_message(envelope);
            } else {
                trace!(%session_id, "Frame for unknown session dropped");
            }
        } else if let Some(id) = envelope.id {
            // Late or duplicate responses resolve nothing and fall
            // through silently inside the registry.
            self.inner.calls.complete(id, envelope);
        } else if envelope.is_event() {
            let method = envelope.method().to_owned();
            let event = ProtocolEvent::new(method, envelope.params);
            self.inner.events.emit_event(&event);
        } else {
            warn!(frame = %text, "Frame is neither response nor event");
        }
    }

    /// Registers the session for a new attachment.
    fn handle_attached(&self, params: AttachedToTargetParams, parent: Option<SessionId>) {
        let session = Session::new(
            self.clone(),
            params.target_info.target_type,
            params.session_id.clone(),
            parent,
        );

        debug!(
            session_id = %params.session_id,
            target_type = %params.target_info.target_type,
            url = %params.target_info.url,
            "Session attached"
        );

        self.inner.sessions.insert(session.clone());
        self.inner
            .session_events
            .emit("attached", &SessionEvent::Attached(session));
    }

    /// Closes and unregisters the session for a detachment.
    fn handle_detached(&self, params: &DetachedFromTargetParams) {
        let Some(session) = self.inner.sessions.remove(&params.session_id) else {
            return;
        };

        if !session.is_closed() {
            session.close("Target.detachedFromTarget");
        }

        self.inner
            .session_events
            .emit("detached", &SessionEvent::Detached(session));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.is_closed())
            .field("sessions", &self.inner.sessions.len())
            .field("pending", &self.inner.calls.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

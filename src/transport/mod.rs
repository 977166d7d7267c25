//! Message transport layer.
//!
//! The multiplexer core is transport-agnostic: anything that can carry
//! text frames both ways and report its own closure works. The crate
//! ships a WebSocket implementation ([`WebSocketTransport`]); tests use a
//! scripted in-memory one.
//!
//! # Contract
//!
//! A transport is constructed together with an event receiver. The
//! transport pushes [`TransportEvent::Message`] for every inbound text
//! frame, then at most one [`TransportEvent::Closed`] when the channel
//! dies, and nothing after that.

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client transport.
pub mod websocket;

pub use websocket::WebSocketTransport;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// TransportEvent
// ============================================================================

/// Inbound notification from a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),

    /// The channel closed, with a reason.
    Closed(String),
}

/// Receiving half handed to the connection at construction.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half used by transport implementations.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Transport Trait
// ============================================================================

/// Duplex text-frame channel to the browser.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Message`] when the frame cannot be
    /// accepted (channel closed, write failure).
    async fn send_text(&self, text: String) -> Result<()>;

    /// Returns `true` once the transport has closed.
    fn is_closed(&self) -> bool;

    /// Stops producing further [`TransportEvent::Message`] events.
    ///
    /// Idempotent. Used by the connection on close so no frame is
    /// processed after teardown began.
    fn stop_reading(&self);
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport scripted by tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::{Transport, TransportEvent, TransportEventSender, TransportEvents};
    use crate::error::{Error, Result};

    /// Transport whose inbound frames are injected by the test and whose
    /// outbound frames are recorded for assertions.
    pub(crate) struct ScriptedTransport {
        events: TransportEventSender,
        sent: Mutex<Vec<String>>,
        closed: AtomicBool,
        reading: AtomicBool,
        fail_sends: AtomicBool,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> (Arc<Self>, TransportEvents) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                events: tx,
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                reading: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
            });
            (transport, rx)
        }

        /// Injects one inbound frame.
        pub(crate) fn push(&self, frame: impl Into<String>) {
            let _ = self.events.send(TransportEvent::Message(frame.into()));
        }

        /// Simulates the remote end closing the channel.
        pub(crate) fn close_remote(&self, reason: &str) {
            self.closed.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Closed(reason.to_string()));
        }

        /// Makes every subsequent `send_text` fail.
        pub(crate) fn fail_sends(&self) {
            self.fail_sends.store(true, Ordering::SeqCst);
        }

        /// Outbound frames recorded so far.
        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        /// Number of outbound frames recorded so far.
        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }

        /// Whether `stop_reading` was called.
        pub(crate) fn reading_stopped(&self) -> bool {
            !self.reading.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_text(&self, text: String) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(Error::message("scripted send failure"));
            }
            self.sent.lock().push(text);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn stop_reading(&self) {
            self.reading.store(false, Ordering::SeqCst);
        }
    }
}

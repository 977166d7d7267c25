//! Frame node.
//!
//! A frame is created when `Page.frameAttached` (or the initial frame
//! tree) names it and lives until `Page.frameDetached`. Replacement on
//! cross-process navigation creates a new frame with a new id; a frame's
//! parent never changes after creation.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::frames::world::{IsolatedWorld, WorldKind};
use crate::identifiers::{FrameId, LoaderId};
use crate::protocol::{FramePayload, LifecycleEventParams};
use crate::session::Session;

// ============================================================================
// Frame
// ============================================================================

/// One node of a page's frame tree.
///
/// Cheap to clone; all clones address the same frame.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

struct FrameInner {
    id: FrameId,

    /// Parent frame id; `None` only for the main frame. Fixed at
    /// creation.
    parent_id: Option<FrameId>,

    session: Session,

    url: Mutex<String>,
    name: Mutex<Option<String>>,

    /// Loader of the current document; a new loader restarts the
    /// lifecycle log.
    loader_id: Mutex<Option<LoaderId>>,

    /// Lifecycle event names observed for the current loader.
    lifecycle: Mutex<FxHashSet<String>>,

    detached: AtomicBool,

    main_world: IsolatedWorld,
    isolated_world: IsolatedWorld,
}

impl Frame {
    /// Creates a frame and its two worlds.
    #[must_use]
    pub fn new(session: Session, id: FrameId, parent_id: Option<FrameId>) -> Self {
        let main_world = IsolatedWorld::new(
            id.clone(),
            String::new(),
            session.clone(),
            WorldKind::Main,
        );
        let isolated_world = IsolatedWorld::new(
            id.clone(),
            String::new(),
            session.clone(),
            WorldKind::Isolated,
        );

        Self {
            inner: Arc::new(FrameInner {
                id,
                parent_id,
                session,
                url: Mutex::new(String::new()),
                name: Mutex::new(None),
                loader_id: Mutex::new(None),
                lifecycle: Mutex::new(FxHashSet::default()),
                detached: AtomicBool::new(false),
                main_world,
                isolated_world,
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Frame id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &FrameId {
        &self.inner.id
    }

    /// Parent frame id; `None` for the main frame.
    #[inline]
    #[must_use]
    pub fn parent_id(&self) -> Option<&FrameId> {
        self.inner.parent_id.as_ref()
    }

    /// Session the frame's target is attached through.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Current document URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.url.lock().clone()
    }

    /// Frame name as set by the embedder.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().clone()
    }

    /// Loader of the current document.
    #[must_use]
    pub fn loader_id(&self) -> Option<LoaderId> {
        self.inner.loader_id.lock().clone()
    }

    /// Returns `true` once the frame has been detached.
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// The page's own world.
    #[inline]
    #[must_use]
    pub fn main_world(&self) -> &IsolatedWorld {
        &self.inner.main_world
    }

    /// The client's private world.
    #[inline]
    #[must_use]
    pub fn isolated_world(&self) -> &IsolatedWorld {
        &self.inner.isolated_world
    }

    /// Lifecycle events observed for the current loader.
    #[must_use]
    pub fn lifecycle_events(&self) -> FxHashSet<String> {
        self.inner.lifecycle.lock().clone()
    }

    // ========================================================================
    // Event Application
    // ========================================================================

    /// Applies a `Page.frameNavigated` payload.
    pub(crate) fn navigated(&self, payload: &FramePayload) {
        let url = payload.full_url();
        *self.inner.url.lock() = url.clone();
        *self.inner.name.lock() = payload.name.clone();
        if let Some(loader_id) = &payload.loader_id {
            *self.inner.loader_id.lock() = Some(loader_id.clone());
        }

        self.inner.main_world.set_url(&url);
        self.inner.isolated_world.set_url(&url);
    }

    /// Applies a `Page.navigatedWithinDocument` URL change.
    pub(crate) fn navigated_within_document(&self, url: &str) {
        *self.inner.url.lock() = url.to_string();
        self.inner.main_world.set_url(url);
        self.inner.isolated_world.set_url(url);
    }

    /// Records a lifecycle event.
    ///
    /// `init` under a new loader starts a fresh log; everything else
    /// accumulates.
    pub(crate) fn on_lifecycle_event(&self, params: &LifecycleEventParams) {
        if params.name == "init" {
            *self.inner.loader_id.lock() = Some(params.loader_id.clone());
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.clear();
            lifecycle.insert(params.name.clone());
        } else {
            self.inner.lifecycle.lock().insert(params.name.clone());
        }
    }

    /// Detaches the frame and both of its worlds. Idempotent.
    pub(crate) fn detach(&self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.main_world.detach();
        self.inner.isolated_world.detach();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.inner.id)
            .field("parent_id", &self.inner.parent_id)
            .field("url", &self.url())
            .field("detached", &self.is_detached())
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
    use crate::identifiers::SessionId;
    use crate::transport::testing::ScriptedTransport;

    async fn test_session() -> Session {
        let (transport, events) = ScriptedTransport::new();
        let connection = Connection::new(
            "ws://test",
            transport.clone(),
            events,
            ConnectionOptions::default(),
        );
        transport.push(
            r#"{"method":"Target.attachedToTarget","params":{"sessionId":"S","targetInfo":{"targetId":"T","type":"page","url":""},"waitingForDebugger":false}}"#,
        );
        connection
            .wait_for_session(&SessionId::new("S"))
            .await
            .expect("session")
    }

    fn lifecycle(name: &str, loader: &str) -> LifecycleEventParams {
        serde_json::from_str(&format!(
            r#"{{"frameId":"F1","loaderId":"{loader}","name":"{name}"}}"#
        ))
        .expect("parse")
    }

    #[tokio::test]
    async fn test_navigated_updates_url_and_loader() {
        let session = test_session().await;
        let frame = Frame::new(session, FrameId::new("F1"), None);

        let payload: FramePayload = serde_json::from_str(
            r##"{"id":"F1","loaderId":"L1","name":"content","url":"https://example.com/a","urlFragment":"#x"}"##,
        )
        .expect("parse");
        frame.navigated(&payload);

        assert_eq!(frame.url(), "https://example.com/a#x");
        assert_eq!(frame.name().as_deref(), Some("content"));
        assert_eq!(frame.loader_id().unwrap().as_str(), "L1");
    }

    #[tokio::test]
    async fn test_new_loader_restarts_lifecycle_log() {
        let session = test_session().await;
        let frame = Frame::new(session, FrameId::new("F1"), None);

        frame.on_lifecycle_event(&lifecycle("init", "L1"));
        frame.on_lifecycle_event(&lifecycle("DOMContentLoaded", "L1"));
        frame.on_lifecycle_event(&lifecycle("load", "L1"));
        assert_eq!(frame.lifecycle_events().len(), 3);

        frame.on_lifecycle_event(&lifecycle("init", "L2"));
        let events = frame.lifecycle_events();
        assert_eq!(events.len(), 1);
        assert!(events.contains("init"));
        assert_eq!(frame.loader_id().unwrap().as_str(), "L2");
    }

    #[tokio::test]
    async fn test_detach_cascades_to_worlds() {
        let session = test_session().await;
        let frame = Frame::new(session, FrameId::new("F1"), Some(FrameId::new("F0")));

        frame.detach();
        assert!(frame.is_detached());
        assert!(frame.main_world().is_detached());
        assert!(frame.isolated_world().is_detached());

        frame.detach(); // idempotent
    }
}

//! Frame lifecycle event consumer.
//!
//! Subscribes to a session and translates `Page.*` and `Runtime.*`
//! events into frame-tree and world mutations. All handlers run on the
//! connection's serialized inbound worker, so tree updates never race.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::events::{EventCallback, EventSubscription, ProtocolEvent};
use crate::frames::frame::Frame;
use crate::frames::tree::FrameTree;
use crate::frames::world::{ExecutionContext, WorldKind};
use crate::identifiers::{ExecutionContextId, FrameId};
use crate::protocol::{
    ExecutionContextCreatedParams, ExecutionContextDestroyedParams, FrameAttachedParams,
    FrameDetachedParams, FrameNavigatedParams, FramePayload, LifecycleEventParams,
    NavigatedWithinDocumentParams,
};
use crate::session::Session;

// ============================================================================
// Constants
// ============================================================================

/// World name registered for the client's private isolated worlds.
const ISOLATED_WORLD_NAME: &str = "__cdp_utility_world__";

// ============================================================================
// FrameManager
// ============================================================================

/// Maintains a session's frame tree and execution contexts.
///
/// Cheap to clone; all clones address the same manager.
#[derive(Clone)]
pub struct FrameManager {
    inner: Arc<FrameManagerInner>,
}

struct FrameManagerInner {
    session: Session,
    tree: FrameTree,

    /// Context id → owning world, for destroy routing.
    contexts: Mutex<FxHashMap<ExecutionContextId, (FrameId, WorldKind)>>,

    /// Session subscriptions, dropped on dispose.
    subscriptions: Mutex<Vec<EventSubscription>>,
}

impl FrameManager {
    /// Creates a manager and subscribes it to the session's frame and
    /// runtime events.
    #[must_use]
    pub fn new(session: Session) -> Self {
        let manager = Self {
            inner: Arc::new(FrameManagerInner {
                session: session.clone(),
                tree: FrameTree::new(),
                contexts: Mutex::new(FxHashMap::default()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        };

        let weak = Arc::downgrade(&manager.inner);
        let subscriptions = vec![
            session.subscribe(
                Some("Page.frameAttached"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<FrameAttachedParams>() {
                        manager.on_frame_attached(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Page.frameNavigated"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<FrameNavigatedParams>() {
                        manager.on_frame_navigated(&params.frame);
                    }
                }),
            ),
            session.subscribe(
                Some("Page.frameDetached"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<FrameDetachedParams>() {
                        manager.on_frame_detached(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Page.lifecycleEvent"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<LifecycleEventParams>() {
                        manager.on_lifecycle_event(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Page.navigatedWithinDocument"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<NavigatedWithinDocumentParams>() {
                        manager.on_navigated_within_document(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Runtime.executionContextCreated"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<ExecutionContextCreatedParams>() {
                        manager.on_execution_context_created(&params);
                    }
                }),
            ),
            session.subscribe(
                Some("Runtime.executionContextDestroyed"),
                handler(weak.clone(), |manager, event| {
                    if let Ok(params) = event.params_as::<ExecutionContextDestroyedParams>() {
                        manager.on_execution_context_destroyed(params.execution_context_id);
                    }
                }),
            ),
            session.subscribe(
                Some("Runtime.executionContextsCleared"),
                handler(weak, |manager, _event| {
                    manager.on_execution_contexts_cleared();
                }),
            ),
        ];
        *manager.inner.subscriptions.lock() = subscriptions;

        manager
    }

    /// Enables the frame and runtime domains and loads the initial tree.
    ///
    /// # Errors
    ///
    /// Propagates session send failures; isolated-world registration is
    /// best-effort per frame.
    pub async fn initialize(&self) -> Result<()> {
        let session = &self.inner.session;

        session.send("Page.enable", None).await?;

        let tree = session.send("Page.getFrameTree", None).await?;
        if let Some(root) = tree.get("frameTree") {
            match serde_json::from_value::<FrameTreeNode>(root.clone()) {
                Ok(node) => self.load_frame_tree(&node),
                Err(e) => warn!(error = %e, "Malformed initial frame tree"),
            }
        }

        session
            .send(
                "Page.setLifecycleEventsEnabled",
                Some(json!({ "enabled": true })),
            )
            .await?;
        session.send("Runtime.enable", None).await?;

        // Private worlds are registered per frame; a frame that navigated
        // away in the meantime just fails its registration.
        for frame in self.inner.tree.frames() {
            let result = session
                .send(
                    "Page.createIsolatedWorld",
                    Some(json!({
                        "frameId": frame.id(),
                        "worldName": ISOLATED_WORLD_NAME,
                        "grantUniveralAccess": true,
                    })),
                )
                .await;
            if let Err(e) = result {
                debug!(error = %e, frame_id = %frame.id(), "Isolated world registration failed");
            }
        }

        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The frame tree.
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &FrameTree {
        &self.inner.tree
    }

    /// Session this manager consumes.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The page's main frame, if known.
    #[must_use]
    pub fn main_frame(&self) -> Option<Frame> {
        self.inner.tree.main_frame()
    }

    /// Immediate frame lookup.
    #[must_use]
    pub fn frame(&self, id: &FrameId) -> Option<Frame> {
        self.inner.tree.get(id)
    }

    /// Resolves a frame as soon as it is attached.
    pub async fn wait_for_frame(&self, id: &FrameId) -> Option<Frame> {
        self.inner.tree.wait_for_frame(id).await
    }

    /// Unsubscribes from the session and tears down the tree.
    pub fn dispose(&self) {
        self.inner.subscriptions.lock().clear();
        for frame in self.inner.tree.frames() {
            frame.detach();
        }
        self.inner.tree.clear();
        self.inner.contexts.lock().clear();
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn on_frame_attached(&self, params: &FrameAttachedParams) {
        if self.inner.tree.get(&params.frame_id).is_some() {
            return;
        }

        trace!(frame_id = %params.frame_id, parent = %params.parent_frame_id, "Frame attached");
        let frame = Frame::new(
            self.inner.session.clone(),
            params.frame_id.clone(),
            Some(params.parent_frame_id.clone()),
        );
        self.inner.tree.add_frame(frame);
    }

    fn on_frame_navigated(&self, payload: &FramePayload) {
        if let Some(frame) = self.inner.tree.get(&payload.id) {
            frame.navigated(payload);
            return;
        }

        // A main-frame swap replaces the root with a new id; the old
        // root is torn down first so the tree keeps a single root.
        if payload.parent_id.is_none()
            && let Some(previous) = self.inner.tree.main_frame()
        {
            previous.detach();
            self.inner.tree.remove_frame(&previous);
        }

        let frame = Frame::new(
            self.inner.session.clone(),
            payload.id.clone(),
            payload.parent_id.clone(),
        );
        frame.navigated(payload);
        self.inner.tree.add_frame(frame);
    }

    fn on_frame_detached(&self, params: &FrameDetachedParams) {
        let Some(frame) = self.inner.tree.get(&params.frame_id) else {
            return;
        };

        trace!(frame_id = %params.frame_id, reason = ?params.reason, "Frame detached");

        if params.is_swap() {
            // The frame moved to another target; drop it here without
            // killing its waiters' error texts.
            self.inner.tree.remove_frame(&frame);
        } else {
            frame.detach();
            self.inner.tree.remove_frame(&frame);
        }
    }

    fn on_lifecycle_event(&self, params: &LifecycleEventParams) {
        if let Some(frame) = self.inner.tree.get(&params.frame_id) {
            frame.on_lifecycle_event(params);
        }
    }

    fn on_navigated_within_document(&self, params: &NavigatedWithinDocumentParams) {
        if let Some(frame) = self.inner.tree.get(&params.frame_id) {
            frame.navigated_within_document(&params.url);
        }
    }

    fn on_execution_context_created(&self, params: &ExecutionContextCreatedParams) {
        let payload = &params.context;
        let Some(frame_id) = payload.frame_id() else {
            return;
        };
        let Some(frame) = self.inner.tree.get(frame_id) else {
            return;
        };

        let kind = if payload.is_default() {
            WorldKind::Main
        } else if payload.name == ISOLATED_WORLD_NAME {
            WorldKind::Isolated
        } else {
            // Some other client's world; not ours to track.
            return;
        };

        let world = match kind {
            WorldKind::Main => frame.main_world(),
            WorldKind::Isolated => frame.isolated_world(),
        };

        self.inner
            .contexts
            .lock()
            .insert(payload.id, (frame_id.clone(), kind));

        let context = ExecutionContext::new(
            payload.id,
            payload.name.clone(),
            self.inner.session.clone(),
        );
        world.set_context(context);
    }

    fn on_execution_context_destroyed(&self, id: ExecutionContextId) {
        let Some((frame_id, kind)) = self.inner.contexts.lock().remove(&id) else {
            return;
        };
        let Some(frame) = self.inner.tree.get(&frame_id) else {
            return;
        };

        match kind {
            WorldKind::Main => frame.main_world().clear_context(),
            WorldKind::Isolated => frame.isolated_world().clear_context(),
        }
    }

    fn on_execution_contexts_cleared(&self) {
        let drained: Vec<_> = {
            let mut contexts = self.inner.contexts.lock();
            contexts.drain().collect()
        };

        for (_, (frame_id, kind)) in drained {
            if let Some(frame) = self.inner.tree.get(&frame_id) {
                match kind {
                    WorldKind::Main => frame.main_world().clear_context(),
                    WorldKind::Isolated => frame.isolated_world().clear_context(),
                }
            }
        }
    }

    // ========================================================================
    // Initial Tree
    // ========================================================================

    fn load_frame_tree(&self, node: &FrameTreeNode) {
        if self.inner.tree.get(&node.frame.id).is_none() {
            let frame = Frame::new(
                self.inner.session.clone(),
                node.frame.id.clone(),
                node.frame.parent_id.clone(),
            );
            frame.navigated(&node.frame);
            self.inner.tree.add_frame(frame);
        }

        for child in &node.child_frames {
            self.load_frame_tree(child);
        }
    }
}

/// `Page.getFrameTree` result node.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameTreeNode {
    frame: FramePayload,

    #[serde(default)]
    child_frames: Vec<FrameTreeNode>,
}

/// Wraps a handler so it only runs while the manager is alive.
fn handler<F>(weak: Weak<FrameManagerInner>, f: F) -> EventCallback<ProtocolEvent>
where
    F: Fn(FrameManager, &ProtocolEvent) + Send + Sync + 'static,
{
    Arc::new(move |event: &ProtocolEvent| {
        if let Some(inner) = weak.upgrade() {
            f(FrameManager { inner }, event);
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

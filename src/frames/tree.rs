//! Frame tree.
//!
//! Mapping of frame id to frame node with parent/child links. Frame
//! events can reference frames the client has not seen yet (a child
//! attaches before its parent's navigation settles), so lookups come in
//! an immediate and an async flavor, like the session registry.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::frames::frame::Frame;
use crate::identifiers::FrameId;

// ============================================================================
// FrameTree
// ============================================================================

/// Tree of frames rooted at the page's main frame.
///
/// At most one frame has no parent id (the main frame) at any time.
#[derive(Default)]
pub struct FrameTree {
    frames: Mutex<FxHashMap<FrameId, Frame>>,
    parent_ids: Mutex<FxHashMap<FrameId, FrameId>>,
    child_ids: Mutex<FxHashMap<FrameId, Vec<FrameId>>>,
    wait_requests: Mutex<FxHashMap<FrameId, Vec<oneshot::Sender<Frame>>>>,
    main_frame: Mutex<Option<Frame>>,
}

impl FrameTree {
    /// Creates an empty tree.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The page's main frame, if known.
    #[must_use]
    pub fn main_frame(&self) -> Option<Frame> {
        self.main_frame.lock().clone()
    }

    /// Snapshot of every registered frame.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().values().cloned().collect()
    }

    /// Immediate lookup by id.
    #[must_use]
    pub fn get(&self, id: &FrameId) -> Option<Frame> {
        self.frames.lock().get(id).cloned()
    }

    /// Registers a frame.
    ///
    /// A parentless frame becomes the tree's main frame; a child is
    /// appended to its parent's ordered child list. Every waiter parked
    /// on this id is resolved.
    pub fn add_frame(&self, frame: Frame) {
        self.frames.lock().insert(frame.id().clone(), frame.clone());

        if let Some(parent_id) = frame.parent_id() {
            self.parent_ids
                .lock()
                .insert(frame.id().clone(), parent_id.clone());
            self.child_ids
                .lock()
                .entry(parent_id.clone())
                .or_default()
                .push(frame.id().clone());
        } else {
            *self.main_frame.lock() = Some(frame.clone());
        }

        let waiters = self.wait_requests.lock().remove(frame.id());
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(frame.clone());
            }
        }
    }

    /// Unregisters a frame and unlinks it from its parent.
    pub fn remove_frame(&self, frame: &Frame) {
        self.frames.lock().remove(frame.id());
        self.parent_ids.lock().remove(frame.id());

        if let Some(parent_id) = frame.parent_id() {
            let mut child_ids = self.child_ids.lock();
            if let Some(children) = child_ids.get_mut(parent_id) {
                children.retain(|id| id != frame.id());
            }
        } else {
            *self.main_frame.lock() = None;
        }
    }

    /// Resolves as soon as a frame with this id is registered.
    ///
    /// Returns `None` when the tree is torn down before the frame
    /// appears.
    pub async fn wait_for_frame(&self, id: &FrameId) -> Option<Frame> {
        let rx = {
            let frames = self.frames.lock();
            if let Some(frame) = frames.get(id) {
                return Some(frame.clone());
            }

            let (tx, rx) = oneshot::channel();
            self.wait_requests.lock().entry(id.clone()).or_default().push(tx);
            drop(frames);
            rx
        };

        rx.await.ok()
    }

    /// Direct children of a frame, in attach order.
    ///
    /// Unknown ids yield an empty list.
    #[must_use]
    pub fn get_child_frames(&self, id: &FrameId) -> Vec<Frame> {
        let child_ids = self.child_ids.lock();
        let Some(children) = child_ids.get(id) else {
            return Vec::new();
        };

        let frames = self.frames.lock();
        children
            .iter()
            .filter_map(|child_id| frames.get(child_id).cloned())
            .collect()
    }

    /// Parent of a frame; `None` for the main frame or unknown ids.
    #[must_use]
    pub fn get_parent_frame(&self, id: &FrameId) -> Option<Frame> {
        let parent_id = self.parent_ids.lock().get(id).cloned()?;
        self.get(&parent_id)
    }

    /// Drops every frame and parked waiter.
    pub fn clear(&self) {
        self.wait_requests.lock().clear();
        self.frames.lock().clear();
        self.parent_ids.lock().clear();
        self.child_ids.lock().clear();
        *self.main_frame.lock() = None;
    }

    /// Number of registered frames.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns `true` when the tree is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! `Page.*` frame lifecycle payloads.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

use crate::identifiers::{FrameId, LoaderId};

// ============================================================================
// FramePayload
// ============================================================================

/// Frame description carried by `Page.frameNavigated` and the frame tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Frame identifier.
    pub id: FrameId,

    /// Parent frame; absent for the main frame.
    #[serde(default)]
    pub parent_id: Option<FrameId>,

    /// Loader of the current document.
    #[serde(default)]
    pub loader_id: Option<LoaderId>,

    /// Frame name as set by the embedder.
    #[serde(default)]
    pub name: Option<String>,

    /// Document URL.
    #[serde(default)]
    pub url: String,

    /// Fragment part of the URL, reported separately.
    #[serde(default)]
    pub url_fragment: Option<String>,
}

impl FramePayload {
    /// Full URL including the fragment.
    #[must_use]
    pub fn full_url(&self) -> String {
        match &self.url_fragment {
            Some(fragment) => format!("{}{fragment}", self.url),
            None => self.url.clone(),
        }
    }
}

// ============================================================================
// Event Params
// ============================================================================

/// Params of `Page.frameAttached`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedParams {
    /// The new frame.
    pub frame_id: FrameId,

    /// Its parent.
    pub parent_frame_id: FrameId,
}

/// Params of `Page.frameNavigated`.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameNavigatedParams {
    /// Post-navigation frame description.
    pub frame: FramePayload,
}

/// Params of `Page.frameDetached`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedParams {
    /// The detached frame.
    pub frame_id: FrameId,

    /// `"remove"` or `"swap"` (out-of-process transfer).
    #[serde(default)]
    pub reason: Option<String>,
}

impl FrameDetachedParams {
    /// Returns `true` when the frame moved to another target rather than
    /// being removed from the document.
    #[inline]
    #[must_use]
    pub fn is_swap(&self) -> bool {
        self.reason.as_deref() == Some("swap")
    }
}

/// Params of `Page.lifecycleEvent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventParams {
    /// Frame the event belongs to.
    pub frame_id: FrameId,

    /// Loader the event belongs to; a new loader restarts the log.
    pub loader_id: LoaderId,

    /// Event name (`init`, `load`, `DOMContentLoaded`, ...).
    pub name: String,
}

/// Params of `Page.navigatedWithinDocument`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocumentParams {
    /// Frame that navigated.
    pub frame_id: FrameId,

    /// New URL.
    pub url: String,
}

// ============================================================================
// Tests
// ============================================================================

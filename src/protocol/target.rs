//! `Target.*` payloads.
//!
//! Attachment is server-driven: the browser pushes
//! `Target.attachedToTarget` both for auto-attached children and in
//! response to an explicit `Target.attachToTarget`, and the two can race.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;

use crate::identifiers::{SessionId, TargetId};

// ============================================================================
// TargetType
// ============================================================================

/// Kind of browser-side target a session can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Top-level page.
    Page,
    /// Out-of-process or same-process iframe.
    Iframe,
    /// Dedicated worker.
    Worker,
    /// Service worker.
    ServiceWorker,
    /// Shared worker.
    SharedWorker,
    /// The browser itself.
    Browser,
    /// Web views, portals, anything newer than this enum.
    #[serde(other)]
    #[default]
    Other,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Page => "page",
            Self::Iframe => "iframe",
            Self::Worker => "worker",
            Self::ServiceWorker => "service_worker",
            Self::SharedWorker => "shared_worker",
            Self::Browser => "browser",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TargetInfo
// ============================================================================

/// Metadata describing an attachable target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target identifier.
    pub target_id: TargetId,

    /// Target kind.
    #[serde(rename = "type", default)]
    pub target_type: TargetType,

    /// Page title at attach time.
    #[serde(default)]
    pub title: String,

    /// Target URL at attach time.
    #[serde(default)]
    pub url: String,

    /// Whether a client is already attached.
    #[serde(default)]
    pub attached: bool,
}

// ============================================================================
// Attach / Detach Payloads
// ============================================================================

/// Params of `Target.attachedToTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetParams {
    /// Session id minted for the attachment.
    pub session_id: SessionId,

    /// The attached target.
    pub target_info: TargetInfo,

    /// Whether the target is paused waiting for a debugger.
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

/// Params of `Target.detachedFromTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    /// Session that was detached.
    pub session_id: SessionId,

    /// Target the session addressed, when reported.
    #[serde(default)]
    pub target_id: Option<TargetId>,
}

/// Result of `Target.attachToTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResponse {
    /// Session id for the new attachment.
    pub session_id: SessionId,
}

// ============================================================================
// Tests
// ============================================================================

//! CDP wire message types.
//!
//! This module defines the JSON envelope exchanged with the browser and
//! the typed payloads for the protocol events the core itself consumes.
//!
//! # Protocol Overview
//!
//! Three logical wire shapes share one JSON envelope:
//!
//! | Message Type | Direction | Correlation |
//! |--------------|-----------|-------------|
//! | `Command` | Local → Remote | `id` |
//! | Command response | Remote → Local | `id` matches a prior command |
//! | Event | Remote → Local | none (unsolicited) |
//!
//! A `sessionId` field, when present, routes the message to a specific
//! attached session; absent means connection-scoped.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound command envelope |
//! | `message` | Inbound envelope (response or event) |
//! | `target` | `Target.*` payloads and target metadata |
//! | `runtime` | `Runtime.*` execution-context and binding payloads |
//! | `page` | `Page.*` frame lifecycle payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command envelope.
pub mod command;

/// Inbound envelope and remote error payload.
pub mod message;

/// Frame lifecycle event payloads.
pub mod page;

/// Execution context and binding payloads.
pub mod runtime;

/// Target attachment payloads.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use message::{Envelope, RemoteError};
pub use page::{
    FrameAttachedParams, FrameDetachedParams, FrameNavigatedParams, FramePayload,
    LifecycleEventParams, NavigatedWithinDocumentParams,
};
pub use runtime::{
    BindingCalledParams, BindingPayload, ContextAuxData, ContextPayload,
    ExecutionContextCreatedParams, ExecutionContextDestroyedParams,
};
pub use target::{
    AttachToTargetResponse, AttachedToTargetParams, DetachedFromTargetParams, TargetInfo,
    TargetType,
};

//! Chromium CDP - Chrome DevTools Protocol session multiplexer.
//!
//! This library turns one duplex DevTools connection into many
//! independently addressable command/event channels, one per attached
//! browser target, and keeps the derived state (frame trees, execution
//! contexts, in-flight network requests) consistent while the protocol
//! delivers its events asynchronously and out of order.
//!
//! # Architecture
//!
//! One WebSocket carries everything:
//!
//! - [`Connection`] owns the transport, allocates command ids and
//!   demultiplexes inbound frames on a single serialized worker
//! - [`Session`] is a sub-channel addressing one target (page, worker,
//!   iframe); sessions nest and are created/destroyed by the browser
//! - [`FrameManager`] and [`FrameTree`] mirror the page's frame tree,
//!   with an [`IsolatedWorld`] pair per frame tracking execution
//!   contexts across navigations
//! - [`NetworkManager`] joins out-of-order network events into
//!   consistent request/response pairs
//!
//! # Quick Start
//!
//! ```no_run
//! use chromium_cdp::{Connection, ConnectionOptions, Result};
//! use chromium_cdp::identifiers::TargetId;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Dial the browser's DevTools endpoint
//!     let connection = Connection::connect(
//!         "ws://127.0.0.1:9222/devtools/browser/abc",
//!         ConnectionOptions::default(),
//!     )
//!     .await?;
//!
//!     // Attach to a page target and drive it
//!     let session = connection
//!         .create_session(&TargetId::new("TARGET"), false)
//!         .await?;
//!     session.send("Page.enable", None).await?;
//!
//!     connection.close("done");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Root multiplexer, call registry, serialized worker |
//! | [`session`] | Per-target sub-channels |
//! | [`frames`] | Frame tree, worlds, execution contexts |
//! | [`network`] | Network event correlation |
//! | [`tasks`] | Wait-until-predicate task lifecycle |
//! | [`events`] | Listener registry with guard-based unsubscription |
//! | [`protocol`] | Wire envelope and typed event payloads |
//! | [`transport`] | Transport trait and WebSocket implementation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Root multiplexer and its registries.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event listener registry.
pub mod events;

/// Frame tree and execution-context lifecycle.
pub mod frames;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Network event correlation.
pub mod network;

/// CDP wire message types.
pub mod protocol;

/// Per-target sub-channels.
pub mod session;

/// Wait-task lifecycle management.
pub mod tasks;

/// Message transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Multiplexer types
pub use connection::{Connection, ConnectionOptions, SessionEvent};
pub use session::Session;

// Frame types
pub use frames::{ExecutionContext, Frame, FrameManager, FrameTree, IsolatedWorld, WorldKind};

// Network types
pub use network::{
    Credentials, NetworkConditions, NetworkEvent, NetworkManager, NetworkRequest, NetworkResponse,
};

// Task types
pub use tasks::{TaskManager, WaitPredicate};

// Event types
pub use events::{EventBus, EventSubscription, ProtocolEvent};

// Error types
pub use error::{Error, Result};

// Transport types
pub use transport::{Transport, TransportEvent, WebSocketTransport};

//! Frame tree and execution-context lifecycle.
//!
//! Frames form a tree rooted at the page's main frame. Each frame owns
//! two worlds (the page's main world and a private isolated world), and
//! each world is bound over time to a sequence of execution contexts,
//! replaced on every navigation. All mutation happens on the
//! connection's serialized inbound worker, driven by `Page.*` and
//! `Runtime.*` events.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame node: url, loader, lifecycle log, worlds |
//! | `tree` | Frame tree with async `wait_for_frame` |
//! | `world` | Isolated worlds and execution contexts |
//! | `binding` | Page-side binding stubs and invocation outcomes |
//! | `manager` | Event consumer translating protocol events into tree mutations |

// ============================================================================
// Submodules
// ============================================================================

/// Page-side binding plumbing.
pub mod binding;

/// Frame node.
pub mod frame;

/// Frame lifecycle event consumer.
pub mod manager;

/// Frame tree.
pub mod tree;

/// Worlds and execution contexts.
pub mod world;

// ============================================================================
// Re-exports
// ============================================================================

pub use binding::{BindingHandler, BindingOutcome};
pub use frame::Frame;
pub use manager::FrameManager;
pub use tree::FrameTree;
pub use world::{ExecutionContext, IsolatedWorld, WorldKind};

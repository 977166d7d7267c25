//! Network event correlation.
//!
//! CDP reports one logical request through up to six events spread over
//! two id spaces, with no cross-event ordering guarantee. This module
//! joins them into [`NetworkRequest`]/[`NetworkResponse`] pairs and
//! raises typed notifications once a join is complete.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `events` | Wire payloads for `Network.*` and `Fetch.*` events |
//! | `state` | Correlation buffers keyed by network id |
//! | `request` | Joined request/response objects |
//! | `manager` | The correlator and interception control |

// ============================================================================
// Submodules
// ============================================================================

/// Wire payloads.
pub mod events;

/// The correlator.
pub mod manager;

/// Joined request/response objects.
pub mod request;

/// Correlation buffers.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use events::{
    AuthRequiredParams, LoadingFailedParams, LoadingFinishedParams, RequestPausedParams,
    RequestPayload, RequestServedFromCacheParams, RequestWillBeSentParams,
    ResponseExtraInfoParams, ResponsePayload, ResponseReceivedParams,
};
pub use manager::{Credentials, NetworkConditions, NetworkEvent, NetworkManager};
pub use request::{NetworkRequest, NetworkResponse};
pub use state::{NetworkEventState, QueuedEventGroup, RedirectInfo};

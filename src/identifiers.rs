//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! CDP uses two id spaces: integer ids allocated locally (command ids,
//! execution context ids) and opaque string ids minted by the browser
//! (sessions, targets, frames, network requests).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// CallId
// ============================================================================

/// Identifier correlating a command with its response.
///
/// Allocated from a connection-wide monotonic counter; never reused while
/// the call is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Creates a call ID from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ExecutionContextId
// ============================================================================

/// Identifier of a live JavaScript execution context.
///
/// Assigned by the browser per navigation; an id is never revived once the
/// context is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContextId(i64);

impl ExecutionContextId {
    /// Creates an execution context ID.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// String Identifiers
// ============================================================================

/// Declares a cheaply-clonable string identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Creates an identifier from a wire string.
            #[inline]
            #[must_use]
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty.
            #[inline]
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }
    };
}

string_id! {
    /// Identifier of a session attached to a target.
    ///
    /// Carried as `sessionId` on commands, responses and events to route
    /// them to the right sub-channel.
    SessionId
}

string_id! {
    /// Identifier of a browser-side target (page, worker, iframe).
    TargetId
}

string_id! {
    /// Identifier of a frame in a page's frame tree.
    FrameId
}

string_id! {
    /// Identifier of a document load within a frame.
    LoaderId
}

string_id! {
    /// Network-layer request identifier.
    ///
    /// Shared across the whole redirect chain of one logical request.
    NetworkRequestId
}

string_id! {
    /// Fetch-layer (interception) request identifier.
    ///
    /// A different id space than [`NetworkRequestId`]; the correlator
    /// bridges the two.
    FetchRequestId
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_display() {
        let id = CallId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.value(), 42);
    }

    #[test]
    fn test_call_id_ordering() {
        assert!(CallId::new(1) < CallId::new(2));
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new("ABCDEF0123");
        assert_eq!(id.as_str(), "ABCDEF0123");
        assert!(!id.is_empty());

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"ABCDEF0123\"");

        let back: SessionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_string_id_spaces_are_distinct_types() {
        // Compile-time property; just exercise the conversions.
        let network: NetworkRequestId = "7".into();
        let fetch: FetchRequestId = "interception-7".into();
        assert_eq!(network.as_str(), "7");
        assert_eq!(fetch.as_str(), "interception-7");
    }

    #[test]
    fn test_execution_context_id_serde() {
        let id = ExecutionContextId::new(3);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "3");
    }

    #[test]
    fn test_empty_session_id() {
        let id = SessionId::new("");
        assert!(id.is_empty());
    }
}

//! Error types for the CDP client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chromium_cdp::{Result, Error};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.send("Page.enable", None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Lifecycle | [`Error::TargetClosed`], [`Error::SessionDetached`] |
//! | Protocol | [`Error::Protocol`], [`Error::Message`] |
//! | Deadlines | [`Error::Timeout`], [`Error::ConnectionTimeout`] |
//! | Execution context | [`Error::ContextDestroyed`], [`Error::DetachedFrame`] |
//! | Network | [`Error::RedirectBodyUnavailable`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The connection or session the call was issued on has been closed.
    ///
    /// Every call still pending at close time fails with this variant, as
    /// does every call attempted afterwards.
    #[error("Protocol error ({method}): Target closed: {reason}")]
    TargetClosed {
        /// Method of the affected call.
        method: String,
        /// Reason the target was closed.
        reason: String,
    },

    /// The session has already been detached from its connection.
    ///
    /// Returned by `detach` when there is no owning connection left.
    #[error("Session already detached. Most likely the {target_type} has been closed")]
    SessionDetached {
        /// Type of the target the session addressed.
        target_type: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The remote end answered a command with an explicit error.
    #[error("Protocol error ({method}): {message}")]
    Protocol {
        /// Method of the failed call.
        method: String,
        /// Error message reported by the browser.
        message: String,
    },

    /// The transport failed to accept a serialized command.
    #[error("Message delivery failed: {message}")]
    Message {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Deadline Errors
    // ========================================================================
    /// A command did not receive a matching response within its deadline.
    #[error("Timeout after {timeout_ms}ms waiting for {method}")]
    Timeout {
        /// Method of the timed-out call.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The transport could not be established within the deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Execution Context Errors
    // ========================================================================
    /// The execution context a caller was awaiting has been destroyed.
    ///
    /// Raised on navigation or reload; a fresh context generation is
    /// installed and later waiters observe that one instead.
    #[error("Execution context was destroyed")]
    ContextDestroyed,

    /// The frame owning the awaited world has been detached.
    ///
    /// Unlike [`Error::ContextDestroyed`], no future context will arrive.
    #[error("Execution context is not available in detached frame \"{url}\" (are you trying to evaluate?)")]
    DetachedFrame {
        /// URL of the detached frame.
        url: String,
    },

    // ========================================================================
    // Network Errors
    // ========================================================================
    /// The response body of a redirect hop cannot be retrieved.
    #[error("Response body is unavailable for redirect responses")]
    RedirectBodyUnavailable,

    /// A response body could not be decoded.
    #[error("Response body decode failed: {message}")]
    BodyDecode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The transport endpoint could not be reached or negotiated.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a target-closed error.
    #[inline]
    pub fn target_closed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TargetClosed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Creates a session-detached error.
    #[inline]
    pub fn session_detached(target_type: impl Into<String>) -> Self {
        Self::SessionDetached {
            target_type: target_type.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a message-delivery error.
    #[inline]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn timeout(method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a detached-frame error.
    #[inline]
    pub fn detached_frame(url: impl Into<String>) -> Self {
        Self::DetachedFrame { url: url.into() }
    }

    /// Creates a body-decode error.
    #[inline]
    pub fn body_decode(message: impl Into<String>) -> Self {
        Self::BodyDecode {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this error indicates a closed target or session.
    #[inline]
    #[must_use]
    pub fn is_target_closed(&self) -> bool {
        matches!(
            self,
            Self::TargetClosed { .. } | Self::SessionDetached { .. }
        )
    }

    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::Message { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error relates to a torn-down execution context.
    #[inline]
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::ContextDestroyed | Self::DetachedFrame { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionTimeout { .. } | Self::ContextDestroyed
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_target_closed_display() {
        let err = Error::target_closed("Page.navigate", "boom");
        assert_eq!(
            err.to_string(),
            "Protocol error (Page.navigate): Target closed: boom"
        );
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::protocol("Runtime.evaluate", "Cannot find context with specified id");
        assert_eq!(
            err.to_string(),
            "Protocol error (Runtime.evaluate): Cannot find context with specified id"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout("Target.attachToTarget", 5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_target_closed() {
        assert!(Error::target_closed("m", "r").is_target_closed());
        assert!(Error::session_detached("page").is_target_closed());
        assert!(!Error::ContextDestroyed.is_target_closed());
    }

    #[test]
    fn test_is_context_error() {
        assert!(Error::ContextDestroyed.is_context_error());
        assert!(Error::detached_frame("https://example.com").is_context_error());
        assert!(!Error::message("x").is_context_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("m", 1000).is_recoverable());
        assert!(!Error::RedirectBodyUnavailable.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}

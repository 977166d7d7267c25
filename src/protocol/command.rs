//! Outbound command envelope.
//!
//! Commands are the only messages the local end originates. The `id` is
//! drawn from the connection-wide counter regardless of which session the
//! command addresses, so ids never collide across sessions.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{CallId, SessionId};

// ============================================================================
// Command
// ============================================================================

/// A command from local end to remote end.
///
/// # Format
///
/// ```json
/// {
///   "id": 7,
///   "method": "Target.attachToTarget",
///   "params": { ... },
///   "sessionId": "ABCDEF"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Identifier for request/response correlation.
    pub id: CallId,

    /// Method in `Domain.method` format.
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Target session, absent for connection-scoped commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Command {
    /// Creates a connection-scoped command.
    #[inline]
    #[must_use]
    pub fn new(id: CallId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            session_id: None,
        }
    }

    /// Creates a session-scoped command.
    #[inline]
    #[must_use]
    pub fn for_session(
        id: CallId,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: SessionId,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            session_id: Some(session_id),
        }
    }

    /// Serializes the command for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the params fail to serialize.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_scoped_command() {
        let command = Command::new(CallId::new(1), "Browser.getVersion", None);
        let wire = command.to_wire().expect("serialize");

        assert!(wire.contains("\"id\":1"));
        assert!(wire.contains("Browser.getVersion"));
        assert!(!wire.contains("sessionId"));
        assert!(!wire.contains("params"));
    }

    #[test]
    fn test_session_scoped_command() {
        let command = Command::for_session(
            CallId::new(9),
            "Runtime.evaluate",
            Some(json!({ "expression": "1 + 1" })),
            SessionId::new("S1"),
        );
        let wire = command.to_wire().expect("serialize");

        assert!(wire.contains("\"sessionId\":\"S1\""));
        assert!(wire.contains("\"expression\":\"1 + 1\""));
    }
}

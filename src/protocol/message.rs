//! Inbound envelope: command responses and events.
//!
//! The browser interleaves both shapes on one stream; the envelope is
//! deserialized once and classified by which fields are present. A frame
//! that fails to deserialize is logged and dropped by the connection, it
//! never tears anything down.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{CallId, SessionId};

// ============================================================================
// Envelope
// ============================================================================

/// An inbound message from the remote end.
///
/// Responses carry `id` and one of `result`/`error`; events carry
/// `method` and `params`. `Target.attachedToTarget` style notifications
/// are events like any other.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Matches a command's `id`; absent on events.
    #[serde(default)]
    pub id: Option<CallId>,

    /// Event method; absent on responses.
    #[serde(default)]
    pub method: Option<String>,

    /// Event parameters.
    #[serde(default)]
    pub params: Value,

    /// Success payload of a response.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload of a response.
    #[serde(default)]
    pub error: Option<RemoteError>,

    /// Session the message is scoped to.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl Envelope {
    /// Parses an envelope from a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] when the frame is not a valid envelope.
    pub fn from_wire(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns `true` if this envelope is a command response.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.id.is_some()
    }

    /// Returns `true` if this envelope is an unsolicited event.
    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        self.method.is_some()
    }

    /// Returns the event method, or `""` for responses.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    /// Converts a response envelope into the call's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] carrying the remote error message when
    /// the response has an `error` field.
    pub fn into_call_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(Error::protocol(method, error.into_message()));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }

    /// Deserializes the event params into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on shape mismatch.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error payload of a command response.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    /// Error message.
    #[serde(default)]
    pub message: String,

    /// JSON-RPC style error code.
    #[serde(default)]
    pub code: Option<i64>,

    /// Supplementary data, often the offending expression.
    #[serde(default)]
    pub data: Option<String>,
}

impl RemoteError {
    /// Flattens message and data into one human-readable string.
    #[must_use]
    pub fn into_message(self) -> String {
        match self.data {
            Some(data) if !data.is_empty() => format!("{} {}", self.message, data),
            _ => self.message,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! `Runtime.*` payloads: execution contexts and bindings.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::identifiers::{ExecutionContextId, FrameId};

// ============================================================================
// Execution Context Payloads
// ============================================================================

/// Context description inside `Runtime.executionContextCreated`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    /// Context id, unique while the context lives.
    pub id: ExecutionContextId,

    /// World name; empty for the main world.
    #[serde(default)]
    pub name: String,

    /// Origin of the context.
    #[serde(default)]
    pub origin: String,

    /// Auxiliary routing data.
    #[serde(default)]
    pub aux_data: Option<ContextAuxData>,
}

impl ContextPayload {
    /// Returns the frame this context belongs to, when reported.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> Option<&FrameId> {
        self.aux_data.as_ref().and_then(|aux| aux.frame_id.as_ref())
    }

    /// Returns `true` if this is the frame's default (main-world) context.
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.aux_data.as_ref().is_some_and(|aux| aux.is_default)
    }
}

/// `auxData` attached to a context payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAuxData {
    /// Owning frame.
    #[serde(default)]
    pub frame_id: Option<FrameId>,

    /// Whether this is the default context of the frame.
    #[serde(default)]
    pub is_default: bool,
}

/// Params of `Runtime.executionContextCreated`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContextCreatedParams {
    /// The new context.
    pub context: ContextPayload,
}

/// Params of `Runtime.executionContextDestroyed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedParams {
    /// Id of the destroyed context.
    pub execution_context_id: ExecutionContextId,
}

// ============================================================================
// Binding Payloads
// ============================================================================

/// Params of `Runtime.bindingCalled`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCalledParams {
    /// Binding name as registered with `Runtime.addBinding`.
    pub name: String,

    /// JSON-encoded [`BindingPayload`].
    pub payload: String,

    /// Context the call originated from.
    pub execution_context_id: ExecutionContextId,
}

impl BindingCalledParams {
    /// Decodes the inner payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] when the payload is not the
    /// expected shape (user code can call the raw binding directly).
    pub fn decode_payload(&self) -> crate::Result<BindingPayload> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Structured payload a page-side binding stub sends through the raw
/// CDP binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingPayload {
    /// Payload kind; this crate only handles `"internal"`.
    #[serde(rename = "type", default)]
    pub payload_type: String,

    /// Binding name.
    pub name: String,

    /// Call sequence number, used to route the result back.
    pub seq: u64,

    /// Arguments passed by the page.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Whether no argument needs handle-based marshalling.
    #[serde(default)]
    pub is_trivial: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_created_parse() {
        let json = r#"{
            "context": {
                "id": 4,
                "origin": "https://example.com",
                "name": "",
                "auxData": {"frameId": "F1", "isDefault": true}
            }
        }"#;

        let params: ExecutionContextCreatedParams = serde_json::from_str(json).expect("parse");
        assert_eq!(params.context.id, ExecutionContextId::new(4));
        assert_eq!(params.context.frame_id().unwrap().as_str(), "F1");
        assert!(params.context.is_default());
    }

    #[test]
    fn test_context_without_aux_data() {
        let json = r#"{"context": {"id": 1, "origin": "", "name": "worker"}}"#;
        let params: ExecutionContextCreatedParams = serde_json::from_str(json).expect("parse");
        assert!(params.context.frame_id().is_none());
        assert!(!params.context.is_default());
    }

    #[test]
    fn test_binding_payload_decode() {
        let params = BindingCalledParams {
            name: "deliver".to_string(),
            payload: r#"{"type":"internal","name":"deliver","seq":2,"args":[1,"x"],"isTrivial":true}"#
                .to_string(),
            execution_context_id: ExecutionContextId::new(3),
        };

        let payload = params.decode_payload().expect("decode");
        assert_eq!(payload.payload_type, "internal");
        assert_eq!(payload.seq, 2);
        assert_eq!(payload.args.len(), 2);
        assert!(payload.is_trivial);
    }

    #[test]
    fn test_binding_payload_from_user_code_is_error() {
        let params = BindingCalledParams {
            name: "deliver".to_string(),
            payload: "just a string".to_string(),
            execution_context_id: ExecutionContextId::new(3),
        };
        assert!(params.decode_payload().is_err());
    }
}

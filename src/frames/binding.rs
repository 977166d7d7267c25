//! Page-side binding plumbing.
//!
//! A binding exposes a client-side function to page JavaScript. The raw
//! CDP binding only carries strings, so a stub is installed in the page
//! that wraps arguments into a JSON payload with a sequence number and
//! returns a promise; the client resolves that promise later by calling
//! back into the page.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// BindingOutcome
// ============================================================================

/// Result of invoking a binding handler.
///
/// Handlers that can answer synchronously return [`BindingOutcome::Ready`];
/// ones that need IO return [`BindingOutcome::Pending`]. Both are resolved
/// uniformly before the result is marshalled back into the page.
pub enum BindingOutcome {
    /// The handler produced a value immediately.
    Ready(Result<Value>),

    /// The handler is still computing.
    Pending(BoxFuture<'static, Result<Value>>),
}

impl BindingOutcome {
    /// Resolves the outcome to a single value.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub async fn resolve(self) -> Result<Value> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(future) => future.await,
        }
    }
}

/// Client-side handler invoked when the page calls a binding.
pub type BindingHandler = Arc<dyn Fn(Vec<Value>) -> BindingOutcome + Send + Sync>;

// ============================================================================
// Page-Side Expressions
// ============================================================================

/// Stub installed into the page for one binding name.
///
/// Re-installation is guarded by the string tag, so running this twice
/// in one context is harmless.
const ADD_PAGE_BINDING: &str = r#"function addPageBinding(type, name) {
  const callCdp = globalThis[name];

  if (callCdp[Symbol.toStringTag] === 'InternalBinding') {
    return;
  }

  Object.assign(globalThis, {
    [name](...args) {
      const callSelf = globalThis[name];
      callSelf.callbacks ??= new Map();

      const seq = (callSelf.lastSeq ?? 0) + 1;
      callSelf.lastSeq = seq;

      callCdp(JSON.stringify({
        type,
        name,
        seq,
        args,
        isTrivial: !args.some(value => value instanceof Node),
      }));

      return new Promise((resolve, reject) => {
        callSelf.callbacks.set(seq, {
          resolve(value) {
            callSelf.callbacks.delete(seq);
            resolve(value);
          },
          reject(value) {
            callSelf.callbacks.delete(seq);
            reject(value);
          },
        });
      });
    },
  });
  globalThis[name][Symbol.toStringTag] = 'InternalBinding';
}"#;

/// Resolves the page-side promise for one binding call.
pub(crate) const DELIVER_RESULT: &str = r#"function deliverResult(name, seq, result) {
  globalThis[name].callbacks.get(seq).resolve(result);
}"#;

/// Rejects the page-side promise for one binding call.
pub(crate) const DELIVER_ERROR: &str = r#"function deliverError(name, seq, message) {
  globalThis[name].callbacks.get(seq).reject(new Error(message));
}"#;

/// Builds the installation expression for a binding.
#[must_use]
pub(crate) fn page_binding_init_string(payload_type: &str, name: &str) -> String {
    evaluation_string(ADD_PAGE_BINDING, &[Value::from(payload_type), Value::from(name)])
}

/// Wraps a function literal into an immediately-invoked expression with
/// JSON-serialized arguments.
#[must_use]
pub(crate) fn evaluation_string(function: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| match arg {
            Value::Null => "undefined".to_string(),
            other => other.to_string(),
        })
        .collect();
    format!("({function})({})", rendered.join(","))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_evaluation_string_serializes_args() {
        let expr = evaluation_string("function f(a, b) {}", &[json!("x"), json!(2)]);
        assert_eq!(expr, "(function f(a, b) {})(\"x\",2)");
    }

    #[test]
    fn test_evaluation_string_null_becomes_undefined() {
        let expr = evaluation_string("function f(a) {}", &[Value::Null]);
        assert_eq!(expr, "(function f(a) {})(undefined)");
    }

    #[test]
    fn test_init_string_embeds_type_and_name() {
        let expr = page_binding_init_string("internal", "deliver");
        assert!(expr.contains("addPageBinding"));
        assert!(expr.ends_with("(\"internal\",\"deliver\")"));
    }

    #[tokio::test]
    async fn test_outcome_ready_resolves_inline() {
        let outcome = BindingOutcome::Ready(Ok(json!(41)));
        assert_eq!(outcome.resolve().await.expect("ok"), json!(41));
    }

    #[tokio::test]
    async fn test_outcome_pending_awaits_future() {
        let outcome = BindingOutcome::Pending(Box::pin(async { Ok(json!("later")) }));
        assert_eq!(outcome.resolve().await.expect("ok"), json!("later"));
    }
}

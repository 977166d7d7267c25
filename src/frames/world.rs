//! Isolated worlds and execution contexts.
//!
//! A world is a named JavaScript scope inside a frame, bound to at most
//! one live execution context at a time. Navigation destroys the context
//! and eventually delivers a replacement; the world bridges that gap
//! with a per-generation slot: waiters parked on the current generation
//! either get its context or a `ContextDestroyed` failure, and a fresh
//! unresolved generation is installed for the next context.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::events::EventSubscription;
use crate::frames::binding::{
    BindingHandler, DELIVER_ERROR, DELIVER_RESULT, page_binding_init_string,
};
use crate::identifiers::{ExecutionContextId, FrameId};
use crate::protocol::{BindingCalledParams, BindingPayload};
use crate::session::Session;
use crate::tasks::{TaskManager, WaitPredicate};

// ============================================================================
// ExecutionContext
// ============================================================================

/// A live, navigation-scoped JavaScript evaluation context.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    id: ExecutionContextId,
    name: String,
    session: Session,
}

impl ExecutionContext {
    /// Creates a context handle.
    #[must_use]
    pub fn new(id: ExecutionContextId, name: String, session: Session) -> Self {
        Self { id, name, session }
    }

    /// Context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ExecutionContextId {
        self.id
    }

    /// World name the context was created for; empty for main worlds.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session the context lives on.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Evaluates an expression in this context, returning its value.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] when the evaluation throws or the context is
    ///   gone
    /// - Session-level errors from [`Session::send`]
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .session
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "contextId": self.id,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;
        unwrap_evaluation("Runtime.evaluate", result)
    }

    /// Calls a function literal in this context with JSON arguments.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionContext::evaluate`].
    pub async fn call_function(&self, function: &str, args: &[Value]) -> Result<Value> {
        let arguments: Vec<Value> = args.iter().map(|arg| json!({ "value": arg })).collect();
        let result = self
            .session
            .send(
                "Runtime.callFunctionOn",
                Some(json!({
                    "functionDeclaration": function,
                    "executionContextId": self.id,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;
        unwrap_evaluation("Runtime.callFunctionOn", result)
    }
}

/// Extracts the plain value from a `Runtime` evaluation result,
/// surfacing thrown exceptions as protocol errors.
fn unwrap_evaluation(method: &str, result: Value) -> Result<Value> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("Evaluation failed");
        return Err(Error::protocol(method, text));
    }

    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

// ============================================================================
// WorldKind
// ============================================================================

/// Which of a frame's two worlds this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldKind {
    /// The page's own world.
    Main,
    /// The client's private world, invisible to page scripts.
    Isolated,
}

// ============================================================================
// ContextCell
// ============================================================================

/// Per-generation context slot.
///
/// Resolving an already-resolved generation is a no-op; `clear` always
/// installs a brand-new generation rather than mutating the old one, so
/// each generation carries at most one value.
#[derive(Default)]
struct ContextCell {
    state: Mutex<CellState>,
}

enum CellState {
    /// Waiters parked for this generation.
    Pending(Vec<oneshot::Sender<Result<ExecutionContext>>>),
    /// This generation's context.
    Ready(ExecutionContext),
}

impl Default for CellState {
    fn default() -> Self {
        Self::Pending(Vec::new())
    }
}

impl ContextCell {
    /// Resolves the current generation. No-op if already resolved.
    fn set(&self, context: ExecutionContext) {
        let mut state = self.state.lock();
        match &mut *state {
            CellState::Pending(waiters) => {
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(Ok(context.clone()));
                }
                *state = CellState::Ready(context);
            }
            CellState::Ready(_) => {}
        }
    }

    /// Fails the current generation with `ContextDestroyed` (pending
    /// waiters only) and installs a fresh one.
    fn clear(&self) {
        let mut state = self.state.lock();
        if let CellState::Pending(waiters) = &mut *state {
            for waiter in waiters.drain(..) {
                let _ = waiter.send(Err(Error::ContextDestroyed));
            }
        }
        *state = CellState::Pending(Vec::new());
    }

    /// Fails pending waiters with a caller-supplied error, leaving the
    /// cell unresolved. Used on world detach, where no context will ever
    /// arrive.
    fn fail_pending(&self, error: impl Fn() -> Error) {
        let mut state = self.state.lock();
        if let CellState::Pending(waiters) = &mut *state {
            for waiter in waiters.drain(..) {
                let _ = waiter.send(Err(error()));
            }
        }
    }

    /// Current context, or a parked waiter for this generation.
    async fn get(&self) -> Result<ExecutionContext> {
        let rx = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Ready(context) => return Ok(context.clone()),
                CellState::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ContextDestroyed),
        }
    }

    fn has_context(&self) -> bool {
        matches!(&*self.state.lock(), CellState::Ready(_))
    }
}

// ============================================================================
// IsolatedWorld
// ============================================================================

/// A frame's binding of a logical world to live execution contexts.
///
/// Cheap to clone; all clones address the same world.
#[derive(Clone)]
pub struct IsolatedWorld {
    inner: Arc<WorldInner>,
}

struct WorldInner {
    frame_id: FrameId,
    kind: WorldKind,
    session: Session,

    /// Frame URL, for detached-frame error text.
    url: Mutex<String>,

    detached: AtomicBool,
    cell: ContextCell,

    /// Binding names installed into the current context generation.
    context_bindings: Mutex<FxHashSet<String>>,

    /// Registered client-side handlers by binding name.
    bindings: Mutex<FxHashMap<String, BindingHandler>>,

    /// Serializes binding installs.
    install_lock: tokio::sync::Mutex<()>,

    /// Cached document handle, dropped whenever the context goes away.
    document: Mutex<Option<Value>>,

    /// Outstanding wait-until-predicate tasks.
    tasks: TaskManager,

    /// `Runtime.bindingCalled` listener; dropped on detach.
    subscription: Mutex<Option<EventSubscription>>,
}

impl IsolatedWorld {
    /// Creates a world and subscribes it to its session's binding calls.
    #[must_use]
    pub fn new(frame_id: FrameId, url: String, session: Session, kind: WorldKind) -> Self {
        let world = Self {
            inner: Arc::new(WorldInner {
                frame_id,
                kind,
                session: session.clone(),
                url: Mutex::new(url),
                detached: AtomicBool::new(false),
                cell: ContextCell::default(),
                context_bindings: Mutex::new(FxHashSet::default()),
                bindings: Mutex::new(FxHashMap::default()),
                install_lock: tokio::sync::Mutex::new(()),
                document: Mutex::new(None),
                tasks: TaskManager::new(),
                subscription: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&world.inner);
        let subscription = session.subscribe(
            Some("Runtime.bindingCalled"),
            Arc::new(move |event| {
                let Some(inner) = weak.upgrade() else { return };
                let Ok(params) = event.params_as::<BindingCalledParams>() else {
                    return;
                };
                let world = IsolatedWorld { inner };
                tokio::spawn(async move {
                    world.on_binding_called(params).await;
                });
            }),
        );
        *world.inner.subscription.lock() = Some(subscription);

        world
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Frame this world belongs to.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> &FrameId {
        &self.inner.frame_id
    }

    /// Main or isolated.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> WorldKind {
        self.inner.kind
    }

    /// Returns `true` while a context is bound.
    #[inline]
    #[must_use]
    pub fn has_context(&self) -> bool {
        self.inner.cell.has_context()
    }

    /// Returns `true` once the world is detached.
    #[inline]
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Outstanding wait tasks.
    #[inline]
    #[must_use]
    pub fn task_manager(&self) -> &TaskManager {
        &self.inner.tasks
    }

    /// Updates the URL used in detached-frame errors.
    pub(crate) fn set_url(&self, url: &str) {
        *self.inner.url.lock() = url.to_string();
    }

    // ========================================================================
    // Context Lifecycle
    // ========================================================================

    /// Binds a new context to this world.
    ///
    /// Clears the per-context binding bookkeeping, resolves the current
    /// generation exactly once and re-runs every outstanding wait task
    /// against the new context.
    pub fn set_context(&self, context: ExecutionContext) {
        trace!(frame_id = %self.inner.frame_id, context_id = %context.id(), kind = ?self.inner.kind, "Context bound");

        self.inner.context_bindings.lock().clear();
        self.inner.cell.set(context.clone());
        self.inner.tasks.rerun_all(&context);
    }

    /// Unbinds the current context.
    ///
    /// Pending waiters fail with [`Error::ContextDestroyed`]; an already
    /// resolved generation is simply replaced. The document handle cache
    /// is dropped so later queries re-resolve against the next context.
    pub fn clear_context(&self) {
        trace!(frame_id = %self.inner.frame_id, kind = ?self.inner.kind, "Context cleared");

        self.inner.cell.clear();
        *self.inner.document.lock() = None;
    }

    /// Current context, waiting for the next generation if none is
    /// bound.
    ///
    /// # Errors
    ///
    /// - [`Error::DetachedFrame`] when the world has been detached
    /// - [`Error::ContextDestroyed`] when the awaited generation is torn
    ///   down before a context arrives
    pub async fn get_execution_context(&self) -> Result<ExecutionContext> {
        if self.is_detached() {
            return Err(Error::detached_frame(self.inner.url.lock().clone()));
        }

        self.inner.cell.get().await
    }

    /// Detaches the world: no context will ever arrive again.
    ///
    /// Unsubscribes from the session, fails parked context waiters and
    /// terminates every outstanding wait task with a detached-frame
    /// failure. Idempotent.
    pub fn detach(&self) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(frame_id = %self.inner.frame_id, kind = ?self.inner.kind, "World detached");

        *self.inner.subscription.lock() = None;

        let url = self.inner.url.lock().clone();
        self.inner.cell.fail_pending(|| Error::detached_frame(url.clone()));
        self.inner
            .tasks
            .terminate_all(|| Error::detached_frame(url.clone()));
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluates an expression in the world's current context.
    ///
    /// # Errors
    ///
    /// Same as [`IsolatedWorld::get_execution_context`] plus evaluation
    /// errors.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let context = self.get_execution_context().await?;
        context.evaluate(expression).await
    }

    /// Suspends until a predicate holds in this world.
    ///
    /// The predicate is evaluated against the current context and again
    /// against every replacement context until it yields a value, fails,
    /// the world detaches, or the deadline passes.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the deadline passes first
    /// - [`Error::DetachedFrame`] when the world is torn down
    /// - The predicate's own hard failure
    pub async fn wait_for(&self, predicate: WaitPredicate, deadline: Duration) -> Result<Value> {
        if self.is_detached() {
            return Err(Error::detached_frame(self.inner.url.lock().clone()));
        }

        let (id, rx) = self.inner.tasks.add(predicate);

        // Initial evaluation; replacement contexts rerun via set_context.
        let world = self.clone();
        tokio::spawn(async move {
            if let Ok(context) = world.get_execution_context().await {
                world.inner.tasks.run_for(id, context).await;
            }
        });

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::detached_frame(self.inner.url.lock().clone())),
            Err(_) => {
                self.inner.tasks.remove(id);
                Err(Error::timeout(
                    "waitForFunction",
                    deadline.as_millis() as u64,
                ))
            }
        }
    }

    // ========================================================================
    // Document Cache
    // ========================================================================

    /// Cached document handle for the current context, if any.
    #[must_use]
    pub fn cached_document(&self) -> Option<Value> {
        self.inner.document.lock().clone()
    }

    /// Caches the document handle until the context is replaced.
    pub fn cache_document(&self, handle: Value) {
        *self.inner.document.lock() = Some(handle);
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Registers the client-side handler for a binding name.
    ///
    /// Installation into a context happens separately via
    /// [`IsolatedWorld::add_binding_to_context`].
    pub fn register_binding(&self, name: &str, handler: BindingHandler) {
        self.inner.bindings.lock().insert(name.to_string(), handler);
    }

    /// Installs a binding into a context. Idempotent per (world, name).
    ///
    /// Failures reporting a destroyed or missing context are swallowed:
    /// the context is gone, so the binding is moot. Anything else is
    /// logged; installation is best-effort and never propagates.
    pub async fn add_binding_to_context(&self, context: &ExecutionContext, name: &str) {
        if self.inner.context_bindings.lock().contains(name) {
            return;
        }

        let _guard = self.inner.install_lock.lock().await;

        // Re-check under the install lock; a racing install may have won.
        if self.inner.context_bindings.lock().contains(name) {
            return;
        }

        let install = async {
            context
                .session()
                .send(
                    "Runtime.addBinding",
                    Some(json!({
                        "name": name,
                        "executionContextId": context.id(),
                    })),
                )
                .await?;

            context
                .evaluate(&page_binding_init_string("internal", name))
                .await?;
            Ok::<_, Error>(())
        };

        match install.await {
            Ok(()) => {
                self.inner
                    .context_bindings
                    .lock()
                    .insert(name.to_string());
            }
            Err(e) => {
                let message = e.to_string();
                let context_gone = message.contains("Execution context was destroyed")
                    || message.contains("Cannot find context with specified id");
                if !context_gone {
                    error!(error = %e, binding = name, "Binding installation failed");
                }
            }
        }
    }

    /// Handles `Runtime.bindingCalled` for this world.
    async fn on_binding_called(&self, params: BindingCalledParams) {
        let Ok(payload) = params.decode_payload() else {
            // Direct invocation of the raw binding by page code.
            return;
        };

        if payload.payload_type != "internal" {
            return;
        }

        if !self.inner.context_bindings.lock().contains(&payload.name) {
            return;
        }

        let Ok(context) = self.get_execution_context().await else {
            return;
        };

        if params.execution_context_id != context.id() {
            return;
        }

        let handler = self.inner.bindings.lock().get(&payload.name).cloned();
        let Some(handler) = handler else { return };

        self.run_binding(&context, &payload, handler).await;
    }

    /// Invokes the handler and marshals its outcome back into the page.
    async fn run_binding(
        &self,
        context: &ExecutionContext,
        payload: &BindingPayload,
        handler: BindingHandler,
    ) {
        let outcome = handler(payload.args.clone()).resolve().await;

        let delivery = match outcome {
            Ok(value) => {
                context
                    .call_function(
                        DELIVER_RESULT,
                        &[json!(payload.name), json!(payload.seq), value],
                    )
                    .await
            }
            Err(e) => {
                context
                    .call_function(
                        DELIVER_ERROR,
                        &[json!(payload.name), json!(payload.seq), json!(e.to_string())],
                    )
                    .await
            }
        };

        if let Err(e) = delivery {
            // The page navigated away mid-delivery; nothing to reject.
            if !matches!(e, Error::Protocol { .. }) {
                error!(error = %e, binding = %payload.name, "Binding result delivery failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

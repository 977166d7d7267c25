//! Wait-task lifecycle management.
//!
//! A wait task is a "suspend until this predicate holds" operation bound
//! to a world. Its predicate is re-evaluated against every new execution
//! context the world receives; when the world is torn down, every
//! outstanding task is terminated en masse.
//!
//! Each task resolves exactly once: success, its own error, termination
//! or timeout, whichever comes first.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};
use crate::frames::ExecutionContext;

// ============================================================================
// Types
// ============================================================================

/// Predicate evaluated against an execution context.
///
/// `Ok(Some(value))` resolves the task, `Ok(None)` keeps it waiting for
/// the next context generation, an error resolves the task with that
/// error, except context-teardown errors, which keep the task alive for
/// the replacement context.
pub type WaitPredicate =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

/// Receiver for a task's single resolution.
pub(crate) type WaitReceiver = oneshot::Receiver<Result<Value>>;

// ============================================================================
// WaitTask
// ============================================================================

#[derive(Clone)]
struct WaitTask {
    id: u64,
    predicate: WaitPredicate,

    /// Single-resolution slot; the first resolver takes the sender.
    result: Arc<Mutex<Option<oneshot::Sender<Result<Value>>>>>,
}

impl WaitTask {
    /// Resolves the task. Returns `false` when it already resolved.
    fn resolve(&self, outcome: Result<Value>) -> bool {
        let Some(tx) = self.result.lock().take() else {
            return false;
        };
        let _ = tx.send(outcome);
        true
    }
}

// ============================================================================
// TaskManager
// ============================================================================

/// Set of outstanding wait tasks for one world.
#[derive(Clone, Default)]
pub struct TaskManager {
    inner: Arc<TaskManagerInner>,
}

#[derive(Default)]
struct TaskManagerInner {
    next_id: AtomicU64,
    tasks: Mutex<FxHashMap<u64, WaitTask>>,
}

impl TaskManager {
    /// Creates an empty manager.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task and returns its id plus the resolution receiver.
    pub(crate) fn add(&self, predicate: WaitPredicate) -> (u64, WaitReceiver) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.tasks.lock().insert(
            id,
            WaitTask {
                id,
                predicate,
                result: Arc::new(Mutex::new(Some(tx))),
            },
        );
        (id, rx)
    }

    /// Drops a task without resolving it (caller timeout or give-up).
    pub(crate) fn remove(&self, id: u64) {
        self.inner.tasks.lock().remove(&id);
    }

    /// Re-evaluates every outstanding task against a new context.
    ///
    /// Called by the world when a context generation resolves. Each
    /// evaluation runs on its own task so one slow predicate cannot
    /// stall the inbound worker.
    pub fn rerun_all(&self, context: &ExecutionContext) {
        let tasks: Vec<WaitTask> = self.inner.tasks.lock().values().cloned().collect();
        trace!(count = tasks.len(), "Rerunning wait tasks");

        for task in tasks {
            let manager = self.clone();
            let context = context.clone();
            tokio::spawn(async move {
                manager.run_once(task, context).await;
            });
        }
    }

    /// Evaluates a single task by id against a context.
    pub(crate) async fn run_for(&self, id: u64, context: ExecutionContext) {
        let task = self.inner.tasks.lock().get(&id).cloned();
        if let Some(task) = task {
            self.run_once(task, context).await;
        }
    }

    /// Terminates every outstanding task with the supplied error.
    pub fn terminate_all(&self, error: impl Fn() -> Error) {
        let drained: Vec<WaitTask> = {
            let mut tasks = self.inner.tasks.lock();
            tasks.drain().map(|(_, task)| task).collect()
        };

        for task in drained {
            task.resolve(Err(error()));
        }
    }

    /// Returns the number of outstanding tasks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Returns `true` when no task is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    async fn run_once(&self, task: WaitTask, context: ExecutionContext) {
        match (task.predicate)(context).await {
            Ok(Some(value)) => {
                if task.resolve(Ok(value)) {
                    self.remove(task.id);
                }
            }
            // Not satisfied yet; the next context generation reruns it.
            Ok(None) => {}
            // The context died mid-evaluation; same story.
            Err(e) if is_context_teardown(&e) => {}
            Err(e) => {
                if task.resolve(Err(e)) {
                    self.remove(task.id);
                }
            }
        }
    }
}

/// Whether an evaluation error means the context is gone (so the task
/// should survive and rerun) rather than the predicate itself failing.
fn is_context_teardown(error: &Error) -> bool {
    if error.is_context_error() {
        return true;
    }
    match error {
        Error::Protocol { message, .. } => {
            message.contains("Execution context was destroyed")
                || message.contains("Cannot find context with specified id")
        }
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

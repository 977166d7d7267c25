//! Serialized inbound-processing queue.
//!
//! One worker task drains a FIFO of jobs, finishing each before starting
//! the next. Every inbound frame is processed through this queue, which
//! is what makes session-registry, frame-tree and execution-context
//! mutation race-free without per-structure locks.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

// ============================================================================
// Types
// ============================================================================

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

// ============================================================================
// SerialQueue
// ============================================================================

/// Single-worker FIFO job queue.
///
/// # Shutdown
///
/// `close` is idempotent and safe to call from a job currently running on
/// the worker: it only flips a flag, so a holder draining its own queue
/// never deadlocks. Jobs still queued at close time are discarded.
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Job>,
    closed: Arc<AtomicBool>,
}

impl SerialQueue {
    /// Creates the queue and spawns its worker task.
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let closed = Arc::new(AtomicBool::new(false));

        let worker_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if worker_closed.load(Ordering::SeqCst) {
                    // Drain without running; the queue is shutting down.
                    continue;
                }
                job.await;
            }
            debug!("Serial queue worker terminated");
        });

        Self { tx, closed }
    }

    /// Enqueues a job behind everything already queued.
    ///
    /// Returns `false` when the queue is closed (job dropped).
    pub fn enqueue(&self, job: impl Future<Output = ()> + Send + 'static) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(Box::pin(job)).is_ok()
    }

    /// Stops running queued jobs. Idempotent and re-entrant.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the queue has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

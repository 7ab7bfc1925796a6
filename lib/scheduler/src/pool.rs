//! The pluggable execution boundary between the coordinator and user code.
//!
//! The coordinator never runs a [`TaskWrapper`] itself — it only ever
//! `submit`s one to whatever [`ExecutionPool`] the facade was configured
//! with, then immediately continues its loop.

use crate::wrapper::TaskWrapper;
use async_trait::async_trait;
use tokio::task::JoinSet;

/// Result of offering a wrapped task to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// The pool took ownership of the task and will run it.
    Accepted,
    /// The pool refused the task (e.g. it is bounded and full). The
    /// coordinator logs this and moves on; the trigger still advances —
    /// this is at-most-once delivery per firing, not at-least-once.
    Rejected,
}

/// External collaborator responsible for actually running wrapped
/// callables, off the coordinator thread. The pool owns its own
/// concurrency model; the scheduler assumes nothing about it beyond this
/// trait's contract:
///
/// - `submit` must be non-blocking or bounded-blocking.
/// - `shutdown` is called once, at process teardown, after the scheduler
///   has already stopped handing out new entries.
#[async_trait]
pub trait ExecutionPool: Send + Sync {
    /// Offers one wrapped firing for execution. Must not block waiting on
    /// the submitted task to *complete* — only (optionally) on admission.
    async fn submit(&self, task: TaskWrapper) -> PoolOutcome;

    /// Stops accepting new work. If `wait` is true, blocks until all
    /// already-accepted tasks have completed; otherwise returns immediately
    /// without interrupting anything in flight.
    async fn shutdown(&self, wait: bool);
}

/// The default pool: every wrapped callable runs on its own lightweight
/// worker, with unbounded concurrency. Callers who need isolation (a
/// bounded queue, a dedicated thread count) supply their own
/// [`ExecutionPool`] via `init_execution_pool` instead.
///
/// Callables are blocking, synchronous work by contract, so they are run
/// via [`tokio::task::spawn_blocking`] rather than on the async runtime's
/// worker threads, to keep a slow user callable from stalling unrelated
/// async tasks.
pub struct DefaultExecutionPool {
    running: tokio::sync::Mutex<JoinSet<()>>,
    stopped: std::sync::atomic::AtomicBool,
}

impl DefaultExecutionPool {
    /// Creates a new pool with no tasks in flight.
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: tokio::sync::Mutex::new(JoinSet::new()),
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Default for DefaultExecutionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionPool for DefaultExecutionPool {
    async fn submit(&self, task: TaskWrapper) -> PoolOutcome {
        if self.stopped.load(std::sync::atomic::Ordering::Acquire) {
            return PoolOutcome::Rejected;
        }
        let mut running = self.running.lock().await;
        // Opportunistically reap finished workers so the set doesn't grow
        // unbounded under sustained traffic.
        while running.try_join_next().is_some() {}
        running.spawn_blocking(move || task.run());
        PoolOutcome::Accepted
    }

    async fn shutdown(&self, wait: bool) {
        self.stopped
            .store(true, std::sync::atomic::Ordering::Release);
        if !wait {
            return;
        }
        let mut running = self.running.lock().await;
        while running.join_next().await.is_some() {}
    }
}

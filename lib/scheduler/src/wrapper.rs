//! Failure isolation between user callables and the coordinator loop.
//!
//! A [`TaskWrapper`] is the only thing ever handed to an [`crate::pool::ExecutionPool`].
//! Running it can never unwind past [`TaskWrapper::run`] — a panic is caught,
//! formatted with the task id and firing time, and handed to a
//! [`DiagnosticSink`] instead.

use almanac_core::TaskId;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A zero-argument unit of user work. Scheduler-internal code never cares
/// what it does, only that it runs to completion or panics.
pub type Callable = Arc<dyn Fn() + Send + Sync>;

/// Severity of a diagnostic emitted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A scheduling decision worth recording but not actionable (pool
    /// rejection, a caught panic).
    Warn,
    /// An internal invariant violation; the coordinator is about to
    /// terminate.
    Error,
}

/// Structured context attached to a diagnostic event.
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    /// The task the diagnostic concerns, if any.
    pub task_id: Option<TaskId>,
    /// The instant the firing was intended for, if any.
    pub fire_time: Option<DateTime<Utc>>,
}

/// A replaceable callback the scheduler reports warnings and errors
/// through, instead of the user ever observing a wrapped failure as an
/// exception.
pub trait DiagnosticSink: Send + Sync {
    /// Records one diagnostic event.
    fn record(&self, level: DiagnosticLevel, message: &str, context: DiagnosticContext);
}

/// Default sink: routes through `tracing`, matching the rest of this
/// repository's crates rather than writing to stderr by hand.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, level: DiagnosticLevel, message: &str, context: DiagnosticContext) {
        let task_id = context.task_id.map(|id| id.to_string()).unwrap_or_default();
        let fire_time = context
            .fire_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        match level {
            DiagnosticLevel::Warn => {
                tracing::warn!(task_id, fire_time, "{message}");
            }
            DiagnosticLevel::Error => {
                tracing::error!(task_id, fire_time, "{message}");
            }
        }
    }
}

/// Wraps one firing of one task's callable for submission to the
/// execution pool. Stateless beyond the bound callable and id.
pub struct TaskWrapper {
    id: TaskId,
    fire_time: DateTime<Utc>,
    callable: Callable,
    sink: Arc<dyn DiagnosticSink>,
}

impl TaskWrapper {
    /// Builds a wrapper for one firing of `id`'s callable.
    #[must_use]
    pub fn new(
        id: TaskId,
        fire_time: DateTime<Utc>,
        callable: Callable,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            id,
            fire_time,
            callable,
            sink,
        }
    }

    /// Runs the callable, catching any panic so it never escapes to the
    /// caller. Intended to run on whatever worker the `ExecutionPool`
    /// chooses, never on the coordinator.
    pub fn run(&self) {
        let callable = Arc::clone(&self.callable);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (callable)()));
        if let Err(panic_payload) = outcome {
            let message = panic_message(&panic_payload);
            self.sink.record(
                DiagnosticLevel::Warn,
                &format!("task {} panicked: {message}", self.id),
                DiagnosticContext {
                    task_id: Some(self.id),
                    fire_time: Some(self.fire_time),
                },
            );
        }
    }

    /// The task this wrapper fires, for pool bookkeeping/logging.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! In-process task scheduler: interval, delay and cron triggers dispatched
//! through a pluggable execution pool.
//!
//! This crate implements the subsystem described in the project's
//! scheduler design: a time-ordered coordinator (one mutex, one condvar,
//! one min-heap — see [`scheduler::SchedulerCore`]) computing next-fire
//! instants from [`trigger::Trigger`] values and submitting wrapped
//! callables to an externally owned [`pool::ExecutionPool`].
//!
//! The facade below (`new_task`, `has_task`, `delete_task`, `reschedule`,
//! `get_task`, `get_all_tasks`, `init_execution_pool`) holds one
//! process-wide [`scheduler::SchedulerCore`], initialized lazily on first
//! use. Embedding code that wants its own isolated scheduler instead of
//! the process-wide singleton can construct [`scheduler::SchedulerCore`]
//! directly.

pub mod config;
pub mod cron;
pub mod entry;
pub mod error;
pub mod handle;
pub mod heap;
pub mod pool;
pub mod scheduler;
pub mod trigger;
pub mod wrapper;

pub use config::SchedulerConfig;
pub use entry::{EntryStatus, TaskSnapshot};
pub use error::{CronError, ScheduleError, TriggerError};
pub use handle::{TaskBuilder, TaskHandle};
pub use pool::{DefaultExecutionPool, ExecutionPool, PoolOutcome};
pub use scheduler::SchedulerCore;
pub use trigger::{cron_trigger, delay_trigger, interval_trigger, RepeatCount, Trigger};
pub use wrapper::{Callable, DiagnosticContext, DiagnosticLevel, DiagnosticSink, TracingSink};

use almanac_core::TaskId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;

static CONFIGURED_POOL: std::sync::OnceLock<Arc<dyn ExecutionPool>> = std::sync::OnceLock::new();
static POOL_CONSUMED: AtomicBool = AtomicBool::new(false);
static SCHEDULER: OnceCell<Arc<SchedulerCore>> = OnceCell::const_new();

/// Installs a custom [`ExecutionPool`] for the process-wide scheduler.
/// Must be called at most once, and before the first scheduling call of
/// any kind. A second call, or one made after the scheduler
/// has already been lazily constructed, fails with
/// [`ScheduleError::AlreadyInitialized`].
pub fn init_execution_pool(pool: Arc<dyn ExecutionPool>) -> Result<(), ScheduleError> {
    if POOL_CONSUMED.load(Ordering::Acquire) {
        return Err(ScheduleError::AlreadyInitialized);
    }
    CONFIGURED_POOL
        .set(pool)
        .map_err(|_| ScheduleError::AlreadyInitialized)
}

async fn global_scheduler() -> &'static Arc<SchedulerCore> {
    SCHEDULER
        .get_or_init(|| async {
            POOL_CONSUMED.store(true, Ordering::Release);
            let pool = CONFIGURED_POOL
                .get()
                .cloned()
                .unwrap_or_else(|| Arc::new(DefaultExecutionPool::new()) as Arc<dyn ExecutionPool>);
            SchedulerCore::new(pool, Arc::new(TracingSink), SchedulerConfig::default())
        })
        .await
}

/// Begins building a new task around `callable`. Chain `.with_id(..)` and
/// `.with_trigger(..)` then call `.schedule()`.
pub async fn new_task(callable: impl Fn() + Send + Sync + 'static) -> TaskBuilder {
    TaskBuilder::new(
        Arc::clone(global_scheduler().await),
        Arc::new(callable) as Callable,
    )
}

/// Whether `id` is currently known to the scheduler (scheduled or
/// paused).
pub async fn has_task(id: TaskId) -> bool {
    global_scheduler().await.has_task(id).await
}

/// Removes `id`. Idempotent: returns whether an entry was actually
/// present.
pub async fn delete_task(id: TaskId) -> bool {
    global_scheduler().await.delete_task(id).await
}

/// Atomically replaces `id`'s trigger and recomputes its schedule.
///
/// # Errors
///
/// `TaskNotFound` if `id` is absent, `SchedulerStopped` if the scheduler
/// has been shut down.
pub async fn reschedule(id: TaskId, trigger: Trigger) -> Result<(), ScheduleError> {
    global_scheduler().await.reschedule(id, trigger).await
}

/// Looks up a handle for `id`, or `None` if it isn't present.
pub async fn get_task(id: TaskId) -> Option<TaskHandle> {
    let scheduler = global_scheduler().await;
    if scheduler.has_task(id).await {
        Some(TaskHandle::new(id, Arc::clone(scheduler)))
    } else {
        None
    }
}

/// Handles for every task currently known to the scheduler, in id order.
pub async fn get_all_tasks() -> Vec<TaskHandle> {
    let scheduler = global_scheduler().await;
    scheduler
        .all_snapshots()
        .await
        .into_iter()
        .map(|snapshot| TaskHandle::new(snapshot.id, Arc::clone(scheduler)))
        .collect()
}

/// Process teardown hook: stops the coordinator and asks the
/// pool to drain. Not exposed as a CLI. Embedding binaries should call
/// this from their own shutdown path (e.g. the same place `bin/server`
/// awaits its other background tasks) since this crate has no
/// language-level exit hook to rely on.
pub async fn shutdown(wait: bool) {
    if let Some(scheduler) = SCHEDULER.get() {
        scheduler.shutdown(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // The facade's scheduler is a process-wide singleton, so these tests
    // share state with each other (and would with any other test binary
    // in this crate) if run in the same process; `tokio::test` gives each
    // its own single-threaded runtime but the `static`s are still shared
    // across tests in this module. Each test therefore uses its own
    // distinctly-id'd task rather than asserting on total task count.

    #[tokio::test(flavor = "multi_thread")]
    async fn facade_schedules_and_finds_a_task() {
        let id = TaskId::new();
        let handle = new_task(|| {})
            .await
            .with_id(id)
            .with_trigger(interval_trigger(10_000).build().unwrap())
            .schedule()
            .await
            .unwrap();
        assert!(has_task(id).await);
        assert!(get_task(id).await.is_some());
        assert_eq!(handle.id(), id);
        assert!(delete_task(id).await);
        assert!(!has_task(id).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn facade_reschedule_updates_trigger() {
        let id = TaskId::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        new_task(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .with_id(id)
        .with_trigger(interval_trigger(10_000).build().unwrap())
        .schedule()
        .await
        .unwrap();

        reschedule(id, interval_trigger(20).build().unwrap())
            .await
            .unwrap();

        let start = std::time::Instant::now();
        while count.load(Ordering::SeqCst) == 0 {
            if start.elapsed() > std::time::Duration::from_secs(2) {
                panic!("rescheduled task never fired");
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        delete_task(id).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn facade_get_all_tasks_includes_scheduled_task() {
        let id = TaskId::new();
        new_task(|| {})
            .await
            .with_id(id)
            .with_trigger(interval_trigger(10_000).build().unwrap())
            .schedule()
            .await
            .unwrap();

        let all = get_all_tasks().await;
        assert!(all.iter().any(|h| h.id() == id));
        delete_task(id).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reschedule_missing_task_reports_not_found() {
        let id = TaskId::new();
        let err = reschedule(id, interval_trigger(100).build().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, ScheduleError::TaskNotFound { id });
    }
}

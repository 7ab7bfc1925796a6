//! The timing loop: a single coordinator, one mutex, one notify, one heap.
//! This is the hardest-engineering component in the crate; everything else
//! here exists to feed it or to observe it through
//! [`crate::handle::TaskHandle`].

use crate::config::SchedulerConfig;
use crate::entry::{EntryStatus, TaskEntry, TaskSnapshot};
use crate::error::ScheduleError;
use crate::heap::FireHeap;
use crate::pool::{ExecutionPool, PoolOutcome};
use crate::trigger::Trigger;
use crate::wrapper::{Callable, DiagnosticContext, DiagnosticLevel, DiagnosticSink, TaskWrapper};
use almanac_core::TaskId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Lifecycle state of a `SchedulerCore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerStatus {
    /// The coordinator is alive and accepting work.
    Running,
    /// Terminal; further scheduling requests are rejected.
    Stopped,
}

struct SchedulerState {
    entries: HashMap<TaskId, TaskEntry>,
    heap: FireHeap,
    status: SchedulerStatus,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            heap: FireHeap::new(),
            status: SchedulerStatus::Running,
        }
    }
}

/// The scheduler: owns the entry index, the heap, and the single
/// coordinator task that drives them. Cheap to clone (it's an `Arc`
/// wrapper in practice — callers hold it behind `Arc<SchedulerCore>`).
pub struct SchedulerCore {
    state: Arc<Mutex<SchedulerState>>,
    notify: Arc<Notify>,
    pool: Arc<dyn ExecutionPool>,
    sink: Arc<dyn DiagnosticSink>,
    config: SchedulerConfig,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerCore {
    /// Constructs a scheduler and immediately spawns its coordinator task.
    /// There is no separate `start()` — the programmatic surface
    /// exposes no such operation, only construction and `shutdown`.
    #[must_use]
    pub fn new(
        pool: Arc<dyn ExecutionPool>,
        sink: Arc<dyn DiagnosticSink>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            state: Arc::new(Mutex::new(SchedulerState::new())),
            notify: Arc::new(Notify::new()),
            pool,
            sink,
            config,
            coordinator: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::coordinate(Arc::clone(&scheduler)));
        // `try_lock` is safe here: nothing else can have touched `coordinator`
        // before the constructor returns.
        *scheduler
            .coordinator
            .try_lock()
            .expect("freshly constructed scheduler has no contention") = Some(handle);
        scheduler
    }

    /// The coordinator loop. Runs until the scheduler is stopped. Never
    /// panics on behalf of user code — only an internal invariant violation
    /// (a popped id missing from `entries`) is fatal.
    async fn coordinate(self: Arc<Self>) {
        loop {
            let wait = {
                let guard = self.state.lock().await;
                if guard.status == SchedulerStatus::Stopped {
                    return;
                }
                match guard.heap.peek() {
                    None => None,
                    Some((next_fire, _)) => {
                        let now = Utc::now();
                        let delta = next_fire - now;
                        if delta <= chrono::Duration::zero() {
                            Some(std::time::Duration::ZERO)
                        } else {
                            let capped = delta
                                .to_std()
                                .unwrap_or(std::time::Duration::from_millis(
                                    self.config.max_coordinator_sleep_millis,
                                ))
                                .min(std::time::Duration::from_millis(
                                    self.config.max_coordinator_sleep_millis,
                                ));
                            Some(capped)
                        }
                    }
                }
            };

            match wait {
                None => {
                    self.notify.notified().await;
                }
                Some(d) if d > std::time::Duration::ZERO => {
                    tokio::select! {
                        () = tokio::time::sleep(d) => {}
                        () = self.notify.notified() => {}
                    }
                }
                Some(_) => {
                    let ready = self.drain_due_entries().await;
                    for wrapped in ready {
                        self.dispatch(wrapped).await;
                    }
                }
            }
        }
    }

    /// Pops every entry whose `next_fire` is due, advances each trigger and
    /// reinserts it if it still has future firings, then returns the
    /// wrapped callables to dispatch — all under a single mutex critical
    /// section, released before any pool submission.
    async fn drain_due_entries(&self) -> Vec<TaskWrapper> {
        let mut guard = self.state.lock().await;
        let now = Utc::now();
        let mut ready = Vec::new();

        loop {
            let Some((next_fire, _)) = guard.heap.peek() else {
                break;
            };
            if next_fire > now {
                break;
            }
            let (_, id) = guard.heap.pop().expect("peeked entry must be poppable");
            let Some(entry) = guard.entries.get_mut(&id) else {
                self.sink.record(
                    DiagnosticLevel::Error,
                    "heap referenced an id missing from the entry map",
                    DiagnosticContext {
                        task_id: Some(id),
                        fire_time: Some(next_fire),
                    },
                );
                continue;
            };

            let prev = entry
                .next_fire
                .take()
                .expect("entry in heap always has next_fire set");
            entry.prev_fire = Some(prev);
            if let Some(remaining) = entry.firings_remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            let next = entry.trigger.next_fire_after(Some(prev), now);
            let exhausted = entry.firings_remaining == Some(0);
            entry.next_fire = if exhausted { None } else { next };

            let wrapper = TaskWrapper::new(
                id,
                prev,
                Arc::clone(&entry.callable),
                Arc::clone(&self.sink),
            );
            let still_pending = entry.next_fire;

            match still_pending {
                Some(next_fire) => guard.heap.push(next_fire, id),
                None => {
                    guard.entries.remove(&id);
                }
            }

            ready.push(wrapper);
        }

        ready
    }

    async fn dispatch(&self, task: TaskWrapper) {
        let id = task.task_id();
        match self.pool.submit(task).await {
            PoolOutcome::Accepted => {}
            PoolOutcome::Rejected => {
                if self.config.log_pool_rejections {
                    self.sink.record(
                        DiagnosticLevel::Warn,
                        "execution pool rejected a firing; the trigger still advanced",
                        DiagnosticContext {
                            task_id: Some(id),
                            fire_time: None,
                        },
                    );
                }
            }
        }
    }

    /// Schedules a new entry. Fails with `DuplicateTaskId` without
    /// mutating the index if `id` is already present, and with
    /// `SchedulerStopped` if called after shutdown.
    pub async fn schedule(
        &self,
        id: TaskId,
        callable: Callable,
        trigger: Trigger,
    ) -> Result<(), ScheduleError> {
        let mut guard = self.state.lock().await;
        if guard.status == SchedulerStatus::Stopped {
            return Err(ScheduleError::SchedulerStopped);
        }
        if guard.entries.contains_key(&id) {
            return Err(ScheduleError::DuplicateTaskId { id });
        }
        let now = Utc::now();
        let entry = TaskEntry::new(id, callable, trigger, now);
        let signal_needed = should_signal(&guard.heap, entry.next_fire);
        if let Some(next_fire) = entry.next_fire {
            guard.heap.push(next_fire, id);
        }
        guard.entries.insert(id, entry);
        drop(guard);
        if signal_needed {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Whether `id` is currently present (scheduled or paused).
    pub async fn has_task(&self, id: TaskId) -> bool {
        self.state.lock().await.entries.contains_key(&id)
    }

    /// Idempotent: returns whether an entry was actually present.
    pub async fn delete_task(&self, id: TaskId) -> bool {
        let mut guard = self.state.lock().await;
        let Some(entry) = guard.entries.remove(&id) else {
            return false;
        };
        if matches!(entry.status, EntryStatus::Scheduled) {
            guard.heap.remove(id);
        }
        true
    }

    /// Replaces `id`'s trigger and recomputes `next_fire` from it as of
    /// now, re-heaping if the entry is currently scheduled.
    pub async fn reschedule(&self, id: TaskId, trigger: Trigger) -> Result<(), ScheduleError> {
        let mut guard = self.state.lock().await;
        if guard.status == SchedulerStatus::Stopped {
            return Err(ScheduleError::SchedulerStopped);
        }
        let now = Utc::now();
        let next_fire = trigger.next_fire_after(None, now);
        let firings_remaining = trigger.initial_firings_remaining();

        let was_scheduled = {
            let Some(entry) = guard.entries.get_mut(&id) else {
                return Err(ScheduleError::TaskNotFound { id });
            };
            let was_scheduled = matches!(entry.status, EntryStatus::Scheduled);
            entry.trigger = trigger;
            entry.next_fire = next_fire;
            entry.firings_remaining = firings_remaining;
            was_scheduled
        };

        if was_scheduled {
            guard.heap.remove(id);
        }
        let signal_needed = if was_scheduled {
            if let Some(next_fire) = next_fire {
                guard.heap.push(next_fire, id);
                should_signal_after_reheap(next_fire, &guard.heap, id)
            } else {
                guard.entries.remove(&id);
                false
            }
        } else if next_fire.is_none() {
            guard.entries.remove(&id);
            false
        } else {
            false
        };
        drop(guard);
        if signal_needed {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Pauses `id`: removed from the heap, retained in the map, `next_fire`
    /// preserved. No-op (but still `Ok`) if already paused.
    pub async fn pause(&self, id: TaskId) -> Result<(), ScheduleError> {
        let mut guard = self.state.lock().await;
        let Some(entry) = guard.entries.get_mut(&id) else {
            return Err(ScheduleError::TaskNotFound { id });
        };
        if matches!(entry.status, EntryStatus::Scheduled) {
            entry.status = EntryStatus::Paused;
            guard.heap.remove(id);
        }
        Ok(())
    }

    /// Resumes `id`. If `next_fire` is already due, it fires exactly once
    /// on the coordinator's next pass (the missed interim firings implied
    /// by a long pause are never replayed), then the trigger advances
    /// normally.
    pub async fn resume(&self, id: TaskId) -> Result<(), ScheduleError> {
        let mut guard = self.state.lock().await;
        let Some(entry) = guard.entries.get_mut(&id) else {
            return Err(ScheduleError::TaskNotFound { id });
        };
        if !matches!(entry.status, EntryStatus::Paused) {
            return Ok(());
        }
        entry.status = EntryStatus::Scheduled;
        let next_fire = entry.next_fire;
        let signal_needed = match next_fire {
            Some(next_fire) => {
                let needed = should_signal(&guard.heap, Some(next_fire));
                guard.heap.push(next_fire, id);
                needed
            }
            None => false,
        };
        drop(guard);
        if signal_needed {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Dispatches one off-schedule firing without touching `next_fire` or
    /// `prev_fire`.
    pub async fn trigger_now(&self, id: TaskId) -> Result<(), ScheduleError> {
        let wrapper = {
            let guard = self.state.lock().await;
            if guard.status == SchedulerStatus::Stopped {
                return Err(ScheduleError::SchedulerStopped);
            }
            let entry = guard
                .entries
                .get(&id)
                .ok_or(ScheduleError::TaskNotFound { id })?;
            TaskWrapper::new(
                id,
                Utc::now(),
                Arc::clone(&entry.callable),
                Arc::clone(&self.sink),
            )
        };
        self.dispatch(wrapper).await;
        Ok(())
    }

    /// A read-only snapshot of `id`'s state, or `None` if absent.
    pub async fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.state
            .lock()
            .await
            .entries
            .get(&id)
            .map(TaskEntry::snapshot)
    }

    /// Snapshots of every task currently known to the scheduler, ordered
    /// by id for stable pagination-friendly output.
    pub async fn all_snapshots(&self) -> Vec<TaskSnapshot> {
        let guard = self.state.lock().await;
        let mut snapshots: Vec<TaskSnapshot> =
            guard.entries.values().map(TaskEntry::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    /// Stops the coordinator. If `wait` is true, blocks until every
    /// already-dispatched task finishes; otherwise returns once the pool
    /// has been told to stop accepting new work, without interrupting
    /// anything in flight.
    pub async fn shutdown(&self, wait: bool) {
        {
            let mut guard = self.state.lock().await;
            guard.status = SchedulerStatus::Stopped;
            guard.entries.clear();
            guard.heap = FireHeap::new();
        }
        self.notify.notify_one();
        if let Some(handle) = self.coordinator.lock().await.take() {
            let _ = handle.await;
        }
        self.pool.shutdown(wait).await;
    }
}

/// Whether inserting/updating an entry to `new_next_fire` could have
/// lowered the heap's current minimum, and therefore needs to wake the
/// coordinator.
fn should_signal(heap: &FireHeap, new_next_fire: Option<chrono::DateTime<Utc>>) -> bool {
    match (new_next_fire, heap.peek()) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(candidate), Some((current_min, _))) => candidate <= current_min,
    }
}

fn should_signal_after_reheap(
    new_next_fire: chrono::DateTime<Utc>,
    heap: &FireHeap,
    id: TaskId,
) -> bool {
    match heap.peek() {
        Some((min_time, min_id)) => min_id == id && min_time == new_next_fire,
        None => false,
    }
}

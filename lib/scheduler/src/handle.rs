//! `TaskHandle`: an opaque, caller-facing reference to one scheduled entry,
//! and `TaskBuilder`, the fluent entry point the facade hands out from
//! `new_task`.

use crate::entry::TaskSnapshot;
use crate::error::ScheduleError;
use crate::scheduler::SchedulerCore;
use crate::trigger::Trigger;
use crate::wrapper::Callable;
use almanac_core::TaskId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Thin wrapper over `(id, scheduler)`. All operations acquire the
/// scheduler's mutex, mutate as needed, signal if required, and return.
/// Cloning a handle is cheap and yields another reference to the same
/// underlying entry.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    scheduler: Arc<SchedulerCore>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, scheduler: Arc<SchedulerCore>) -> Self {
        Self { id, scheduler }
    }

    /// This handle's task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Removes the entry from the heap; it is retained in the index but
    /// never fires until [`Self::resume`]. No-op if already paused.
    pub async fn pause(&self) -> Result<(), ScheduleError> {
        self.scheduler.pause(self.id).await
    }

    /// Re-admits a paused entry into the heap. A firing already due at the
    /// time of resume is coalesced into a single immediate firing, not replayed once per missed interval.
    pub async fn resume(&self) -> Result<(), ScheduleError> {
        self.scheduler.resume(self.id).await
    }

    /// Removes the entry entirely. Idempotent: returns whether it was
    /// actually present.
    pub async fn delete(&self) -> bool {
        self.scheduler.delete_task(self.id).await
    }

    /// Dispatches one off-schedule firing, leaving the regular schedule
    /// untouched.
    pub async fn trigger_now(&self) -> Result<(), ScheduleError> {
        self.scheduler.trigger_now(self.id).await
    }

    /// Whether the entry is still present (scheduled or paused).
    pub async fn exists(&self) -> bool {
        self.scheduler.has_task(self.id).await
    }

    /// Whether the entry is currently paused. `false` if the entry no
    /// longer exists.
    pub async fn is_paused(&self) -> bool {
        self.scheduler
            .snapshot(self.id)
            .await
            .is_some_and(|snapshot| snapshot.paused)
    }

    /// The next intended firing instant, if any and if the entry still
    /// exists.
    pub async fn get_next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduler.snapshot(self.id).await.and_then(|s| s.next_fire)
    }

    /// The most recent firing instant, if any and if the entry still
    /// exists. Diagnostic only.
    pub async fn get_previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduler.snapshot(self.id).await.and_then(|s| s.prev_fire)
    }

    /// A full read-only snapshot of the entry's state, or `None` if it no
    /// longer exists.
    pub async fn snapshot(&self) -> Option<TaskSnapshot> {
        self.scheduler.snapshot(self.id).await
    }
}

/// Fluent entry point for scheduling a new task: `new_task(callable)
/// .with_id(id).with_trigger(trigger).schedule()`.
pub struct TaskBuilder {
    scheduler: Arc<SchedulerCore>,
    callable: Callable,
    id: Option<TaskId>,
    trigger: Option<Trigger>,
}

impl TaskBuilder {
    pub(crate) fn new(scheduler: Arc<SchedulerCore>, callable: Callable) -> Self {
        Self {
            scheduler,
            callable,
            id: None,
            trigger: None,
        }
    }

    /// Assigns an explicit id. If omitted, [`Self::schedule`] mints one.
    #[must_use]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the firing policy. Required before [`Self::schedule`].
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Validates and submits the entry, returning a handle to it.
    ///
    /// # Errors
    ///
    /// `DuplicateTaskId` if an explicit id collides with an existing entry
    /// (checked before any mutation so the existing entry is never touched),
    /// `SchedulerStopped` if the scheduler has already been shut down.
    pub async fn schedule(self) -> Result<TaskHandle, ScheduleError> {
        let id = self.id.unwrap_or_else(TaskId::new);
        let trigger = self
            .trigger
            .expect("with_trigger must be called before schedule");

        if self.scheduler.has_task(id).await {
            return Err(ScheduleError::DuplicateTaskId { id });
        }
        self.scheduler
            .schedule(id, self.callable, trigger)
            .await?;
        Ok(TaskHandle::new(id, self.scheduler))
    }
}

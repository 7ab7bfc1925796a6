//! In-memory record binding an id, callable and trigger to its runtime
//! state.

use crate::trigger::Trigger;
use crate::wrapper::Callable;
use almanac_core::TaskId;
use chrono::{DateTime, Utc};

/// Whether a `TaskEntry` currently participates in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Present in the index; will fire at `next_fire`.
    Scheduled,
    /// Retained in the map but absent from the heap; never fires until
    /// resumed.
    Paused,
}

/// A read-only snapshot of a `TaskEntry`, safe to hand out past the
/// scheduler mutex. Denormalized for cheap inspection, the same way a
/// workflow trigger store exposes a read record distinct from its live
/// state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskSnapshot {
    /// The task's id.
    pub id: TaskId,
    /// Whether the task is currently paused.
    pub paused: bool,
    /// The next intended firing instant, if any.
    pub next_fire: Option<DateTime<Utc>>,
    /// The most recent firing instant, if any (diagnostic only).
    pub prev_fire: Option<DateTime<Utc>>,
    /// Remaining firings, or `None` for unlimited.
    pub firings_remaining: Option<u64>,
}

/// Scheduler-owned mutable record for one scheduled task.
/// Mutated only by `SchedulerCore`'s coordinator and handle operations,
/// both of which hold the scheduler mutex.
pub struct TaskEntry {
    pub id: TaskId,
    pub callable: Callable,
    pub trigger: Trigger,
    pub status: EntryStatus,
    pub next_fire: Option<DateTime<Utc>>,
    pub prev_fire: Option<DateTime<Utc>>,
    pub firings_remaining: Option<u64>,
}

impl TaskEntry {
    /// Builds a freshly scheduled entry, computing its first `next_fire`
    /// from `trigger` as of `now`.
    #[must_use]
    pub fn new(id: TaskId, callable: Callable, trigger: Trigger, now: DateTime<Utc>) -> Self {
        let next_fire = trigger.next_fire_after(None, now);
        let firings_remaining = trigger.initial_firings_remaining();
        Self {
            id,
            callable,
            trigger,
            status: EntryStatus::Scheduled,
            next_fire,
            prev_fire: None,
            firings_remaining,
        }
    }

    /// Whether this entry still has firings left to offer, independent of
    /// pause state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next_fire.is_none() || self.firings_remaining == Some(0)
    }

    /// Produces the read-only snapshot used by `TaskHandle::snapshot`.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            paused: matches!(self.status, EntryStatus::Paused),
            next_fire: self.next_fire,
            prev_fire: self.prev_fire,
            firings_remaining: self.firings_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{delay_trigger, interval_trigger};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn new_entry_computes_first_fire_and_status() {
        let trigger = interval_trigger(200).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let entry = TaskEntry::new(TaskId::new(), Arc::new(|| {}), trigger, now);
        assert_eq!(entry.next_fire, Some(now));
        assert_eq!(entry.prev_fire, None);
        assert!(matches!(entry.status, EntryStatus::Scheduled));
        assert!(!entry.is_terminal());
    }

    #[test]
    fn delay_entry_is_terminal_once_next_fire_consumed() {
        let trigger = delay_trigger(100).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let mut entry = TaskEntry::new(TaskId::new(), Arc::new(|| {}), trigger, now);
        entry.next_fire = entry.trigger.next_fire_after(entry.next_fire, now);
        assert!(entry.is_terminal());
    }

    #[test]
    fn snapshot_reflects_paused_status() {
        let trigger = interval_trigger(200).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let mut entry = TaskEntry::new(TaskId::new(), Arc::new(|| {}), trigger, now);
        entry.status = EntryStatus::Paused;
        assert!(entry.snapshot().paused);
    }

    #[test]
    fn snapshot_serializes_to_json_for_external_inspection() {
        let trigger = interval_trigger(200).with_repeat_count(4).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let entry = TaskEntry::new(TaskId::new(), Arc::new(|| {}), trigger, now);
        let snapshot = entry.snapshot();

        let json = serde_json::to_string(&snapshot).expect("snapshot serializes");
        assert!(json.contains("\"paused\":false"));
        assert!(json.contains("\"firings_remaining\":5"));
    }
}

//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `TriggerError`: Errors raised while constructing a `Trigger`.
//! - `CronError`: Errors raised while parsing a cron expression (a
//!   `TriggerError` variant wraps this one with the offending expression).
//! - `ScheduleError`: Errors raised by the facade / `TaskBuilder` / handle
//!   surface (wraps `TriggerError` via context where useful).

use almanac_core::TaskId;
use std::fmt;

/// Errors from constructing a [`crate::trigger::Trigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// `interval_millis` was zero.
    NonPositiveInterval,
    /// `delay_millis` was zero.
    NonPositiveDelay,
    /// `repeat_count` was less than `-1`.
    InvalidRepeatCount { value: i64 },
    /// The cron expression failed to parse.
    InvalidCron {
        expression: String,
        source: CronError,
    },
    /// The named timezone is not recognized.
    InvalidTimezone { timezone: String },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveInterval => write!(f, "interval_millis must be greater than zero"),
            Self::NonPositiveDelay => write!(f, "delay_millis must be greater than zero"),
            Self::InvalidRepeatCount { value } => {
                write!(f, "repeat_count must be -1 (infinite) or >= 0, got {value}")
            }
            Self::InvalidCron { expression, source } => {
                write!(f, "invalid cron expression '{expression}': {source}")
            }
            Self::InvalidTimezone { timezone } => {
                write!(f, "invalid timezone: {timezone}")
            }
        }
    }
}

impl std::error::Error for TriggerError {}

/// Errors from parsing one field or the whole of a six-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    /// Expression did not split into exactly six whitespace-separated fields.
    WrongFieldCount { found: usize },
    /// A single field failed to parse.
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
    /// A numeric value fell outside the field's valid range.
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    /// `?` was used outside of the day-of-month / day-of-week fields.
    QuestionMarkNotAllowed { field: &'static str },
}

impl fmt::Display for CronError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongFieldCount { found } => {
                write!(f, "expected 6 fields (sec min hour dom month dow), got {found}")
            }
            Self::InvalidField {
                field,
                value,
                reason,
            } => write!(f, "field '{field}' ('{value}'): {reason}"),
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(
                f,
                "field '{field}' value {value} out of range [{min}, {max}]"
            ),
            Self::QuestionMarkNotAllowed { field } => {
                write!(f, "'?' is only allowed in day-of-month/day-of-week, not '{field}'")
            }
        }
    }
}

impl std::error::Error for CronError {}

/// High-level errors surfaced by the facade, `TaskBuilder` and `TaskHandle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Trigger construction failed (use as a context wrapper).
    InvalidTrigger(TriggerError),
    /// `schedule()` was called with an id that already exists.
    DuplicateTaskId { id: TaskId },
    /// A handle or facade operation addressed an id that isn't present.
    TaskNotFound { id: TaskId },
    /// An operation was attempted after `Scheduler::shutdown`.
    SchedulerStopped,
    /// `init_execution_pool` was called more than once.
    AlreadyInitialized,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTrigger(source) => write!(f, "invalid trigger: {source}"),
            Self::DuplicateTaskId { id } => write!(f, "task id already scheduled: {id}"),
            Self::TaskNotFound { id } => write!(f, "task not found: {id}"),
            Self::SchedulerStopped => write!(f, "scheduler has been shut down"),
            Self::AlreadyInitialized => {
                write!(f, "execution pool was already initialized")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<TriggerError> for ScheduleError {
    fn from(err: TriggerError) -> Self {
        Self::InvalidTrigger(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_error_display() {
        let err = TriggerError::NonPositiveInterval;
        assert!(err.to_string().contains("interval_millis"));
    }

    #[test]
    fn cron_error_display() {
        let err = CronError::WrongFieldCount { found: 5 };
        assert!(err.to_string().contains("6 fields"));
    }

    #[test]
    fn schedule_error_display() {
        let id = TaskId::new();
        let err = ScheduleError::TaskNotFound { id };
        assert!(err.to_string().contains("task not found"));
    }

    #[test]
    fn schedule_error_from_trigger_error() {
        let err: ScheduleError = TriggerError::NonPositiveDelay.into();
        assert!(matches!(err, ScheduleError::InvalidTrigger(_)));
    }
}

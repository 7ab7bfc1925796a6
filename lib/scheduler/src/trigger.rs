//! Firing policies: pure values describing when a task should next fire.
//!
//! A [`Trigger`] never mutates itself and never touches a clock beyond the
//! `now`/`previous` instants it is handed; all mutable bookkeeping (firings
//! remaining, the currently scheduled instant) lives on the scheduler's
//! `TaskEntry`, not here. See `cron` for the calendar-expression variant.

use crate::cron::CronFields;
use crate::error::TriggerError;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// How many more times an [`Trigger::Interval`] should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    /// Fires forever.
    Infinite,
    /// Fires `remaining + 1` more times in total from construction.
    Finite(u64),
}

impl RepeatCount {
    fn from_wire(value: i64) -> Result<Self, TriggerError> {
        match value {
            -1 => Ok(Self::Infinite),
            n if n >= 0 => Ok(Self::Finite(n as u64)),
            n => Err(TriggerError::InvalidRepeatCount { value: n }),
        }
    }
}

/// Immutable firing policy. One of fixed-interval, delayed one-shot, or a
/// calendar expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Fires repeatedly on a fixed period, optionally after an initial delay
    /// and for a bounded number of repeats.
    Interval {
        interval_millis: u64,
        initial_delay_millis: u64,
        repeat_count: RepeatCount,
    },
    /// Fires exactly once, `delay_millis` after it is attached to a task.
    Delay { delay_millis: u64 },
    /// Fires on every instant matching a six-field cron expression.
    Cron {
        fields: CronFields,
        zone: Tz,
        expression: String,
        timezone: String,
    },
}

impl Trigger {
    /// Computes the next firing instant strictly after `previous`, given the
    /// current instant `now`. `previous` is `None` before the first firing,
    /// in which case `now` doubles as the scheduling instant (the trigger is
    /// evaluated once, immediately, when the task is scheduled).
    ///
    /// Returns `None` when the trigger has no more firings to offer on
    /// purely temporal grounds (a `Delay` trigger after its one firing, or a
    /// `Cron` expression with no remaining match). Exhaustion driven by a
    /// finite `repeat_count` is tracked by the caller (`TaskEntry`), not
    /// here.
    #[must_use]
    pub fn next_fire_after(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval {
                interval_millis,
                initial_delay_millis,
                ..
            } => match previous {
                None => {
                    let origin = now + Duration::milliseconds(*initial_delay_millis as i64);
                    Some(origin)
                }
                Some(prev) => Some(prev + Duration::milliseconds(*interval_millis as i64)),
            },
            Self::Delay { delay_millis } => match previous {
                None => Some(now + Duration::milliseconds(*delay_millis as i64)),
                Some(_) => None,
            },
            Self::Cron { fields, zone, .. } => fields.next_after(previous, now, *zone),
        }
    }

    /// The initial `firings_remaining` budget a `TaskEntry` should start
    /// with for this trigger. `None` means unlimited.
    #[must_use]
    pub fn initial_firings_remaining(&self) -> Option<u64> {
        match self {
            Self::Interval { repeat_count, .. } => match repeat_count {
                RepeatCount::Infinite => None,
                RepeatCount::Finite(r) => Some(r + 1),
            },
            Self::Delay { .. } => Some(1),
            Self::Cron { .. } => None,
        }
    }
}

/// Entry point for building an [`Trigger::Interval`].
///
/// ```ignore
/// let trigger = interval_trigger(200)
///     .with_initial_delay(0)
///     .with_repeat_count(2)
///     .build()?;
/// ```
#[must_use]
pub fn interval_trigger(interval_millis: u64) -> IntervalTriggerBuilder {
    IntervalTriggerBuilder {
        interval_millis,
        initial_delay_millis: 0,
        repeat_count: -1,
    }
}

/// Builder for [`Trigger::Interval`]. See [`interval_trigger`].
#[derive(Debug, Clone, Copy)]
pub struct IntervalTriggerBuilder {
    interval_millis: u64,
    initial_delay_millis: u64,
    repeat_count: i64,
}

impl IntervalTriggerBuilder {
    /// Sets the delay, in milliseconds, before the first firing. Defaults
    /// to zero.
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay_millis: u64) -> Self {
        self.initial_delay_millis = initial_delay_millis;
        self
    }

    /// Sets the total number of *additional* firings after the first one.
    /// `-1` (the default) means infinite.
    #[must_use]
    pub fn with_repeat_count(mut self, repeat_count: i64) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// Validates and produces the immutable [`Trigger`].
    pub fn build(self) -> Result<Trigger, TriggerError> {
        if self.interval_millis == 0 {
            return Err(TriggerError::NonPositiveInterval);
        }
        let repeat_count = RepeatCount::from_wire(self.repeat_count)?;
        Ok(Trigger::Interval {
            interval_millis: self.interval_millis,
            initial_delay_millis: self.initial_delay_millis,
            repeat_count,
        })
    }
}

/// Entry point for building an [`Trigger::Delay`].
#[must_use]
pub fn delay_trigger(delay_millis: u64) -> DelayTriggerBuilder {
    DelayTriggerBuilder { delay_millis }
}

/// Builder for [`Trigger::Delay`]. See [`delay_trigger`].
#[derive(Debug, Clone, Copy)]
pub struct DelayTriggerBuilder {
    delay_millis: u64,
}

impl DelayTriggerBuilder {
    /// Validates and produces the immutable [`Trigger`].
    pub fn build(self) -> Result<Trigger, TriggerError> {
        if self.delay_millis == 0 {
            return Err(TriggerError::NonPositiveDelay);
        }
        Ok(Trigger::Delay {
            delay_millis: self.delay_millis,
        })
    }
}

/// Entry point for building an [`Trigger::Cron`].
#[must_use]
pub fn cron_trigger(expression: impl Into<String>) -> CronTriggerBuilder {
    CronTriggerBuilder {
        expression: expression.into(),
        timezone: "UTC".to_string(),
    }
}

/// Builder for [`Trigger::Cron`]. See [`cron_trigger`].
#[derive(Debug, Clone)]
pub struct CronTriggerBuilder {
    expression: String,
    timezone: String,
}

impl CronTriggerBuilder {
    /// Sets the IANA timezone the expression is evaluated in. Defaults to
    /// `"UTC"`.
    #[must_use]
    pub fn with_zone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Parses the expression and resolves the timezone, producing the
    /// immutable [`Trigger`].
    pub fn build(self) -> Result<Trigger, TriggerError> {
        let fields =
            CronFields::parse(&self.expression).map_err(|source| TriggerError::InvalidCron {
                expression: self.expression.clone(),
                source,
            })?;
        let zone = Tz::from_str(&self.timezone).map_err(|_| TriggerError::InvalidTimezone {
            timezone: self.timezone.clone(),
        })?;
        Ok(Trigger::Cron {
            fields,
            zone,
            expression: self.expression,
            timezone: self.timezone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn interval_rejects_zero() {
        assert_eq!(
            interval_trigger(0).build(),
            Err(TriggerError::NonPositiveInterval)
        );
    }

    #[test]
    fn interval_rejects_invalid_repeat_count() {
        let err = interval_trigger(100).with_repeat_count(-2).build();
        assert_eq!(err, Err(TriggerError::InvalidRepeatCount { value: -2 }));
    }

    #[test]
    fn interval_accepts_one_millisecond() {
        assert!(interval_trigger(1).build().is_ok());
    }

    #[test]
    fn interval_first_fire_honors_initial_delay() {
        let trigger = interval_trigger(200).with_initial_delay(50).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let next = trigger.next_fire_after(None, now).unwrap();
        assert_eq!(next, now + Duration::milliseconds(50));
    }

    #[test]
    fn interval_subsequent_fire_adds_interval_to_previous() {
        let trigger = interval_trigger(200).build().unwrap();
        let prev = utc(2026, 1, 1, 0, 0, 0);
        let next = trigger
            .next_fire_after(Some(prev), prev + Duration::milliseconds(200))
            .unwrap();
        assert_eq!(next, prev + Duration::milliseconds(200));
    }

    #[test]
    fn interval_catches_up_without_skipping_when_scheduler_wakes_late() {
        let trigger = interval_trigger(200).build().unwrap();
        let prev = utc(2026, 1, 1, 0, 0, 0);
        // Scheduler woke up a full second late; the next fire is still
        // exactly one interval past the previous firing, not clamped to now.
        let late_now = prev + Duration::seconds(1);
        let next = trigger.next_fire_after(Some(prev), late_now).unwrap();
        assert_eq!(next, prev + Duration::milliseconds(200));
    }

    #[test]
    fn interval_initial_firings_remaining() {
        let infinite = interval_trigger(100).build().unwrap();
        assert_eq!(infinite.initial_firings_remaining(), None);

        let finite = interval_trigger(100).with_repeat_count(2).build().unwrap();
        assert_eq!(finite.initial_firings_remaining(), Some(3));
    }

    #[test]
    fn delay_rejects_zero() {
        assert_eq!(delay_trigger(0).build(), Err(TriggerError::NonPositiveDelay));
    }

    #[test]
    fn delay_fires_once() {
        let trigger = delay_trigger(300).build().unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let first = trigger.next_fire_after(None, now).unwrap();
        assert_eq!(first, now + Duration::milliseconds(300));
        assert_eq!(trigger.next_fire_after(Some(first), first), None);
        assert_eq!(trigger.initial_firings_remaining(), Some(1));
    }

    #[test]
    fn cron_build_rejects_malformed_expression() {
        let err = cron_trigger("not a cron").build();
        assert!(matches!(err, Err(TriggerError::InvalidCron { .. })));
    }

    #[test]
    fn cron_build_rejects_unknown_timezone() {
        let err = cron_trigger("0 0 2 * * ?").with_zone("Nowhere/Fake").build();
        assert!(matches!(err, Err(TriggerError::InvalidTimezone { .. })));
    }

    #[test]
    fn cron_defaults_to_utc() {
        let trigger = cron_trigger("0 0 2 * * ?").build().unwrap();
        match trigger {
            Trigger::Cron { timezone, .. } => assert_eq!(timezone, "UTC"),
            _ => panic!("expected cron trigger"),
        }
    }

    #[test]
    fn cron_next_fire_delegates_to_fields() {
        let trigger = cron_trigger("0 0 2 * * ?").build().unwrap();
        let noon = utc(2026, 1, 1, 12, 0, 0);
        let next = trigger.next_fire_after(None, noon).unwrap();
        assert_eq!(next, utc(2026, 1, 2, 2, 0, 0));
    }

    /// Round-trip law: `intervalTrigger(k).repeatCount(n)` produces `n + 1`
    /// monotonically increasing instants separated by exactly `k` ms, driven
    /// purely through `next_fire_after` the way the coordinator drives it
    /// (each call fed the previous call's own result).
    #[test]
    fn interval_round_trip_produces_evenly_spaced_monotonic_instants() {
        let k = 137u64;
        let n = 9u64;
        let trigger = interval_trigger(k).with_repeat_count(n).build().unwrap();
        let origin = utc(2026, 3, 1, 0, 0, 0);

        let mut instants = Vec::new();
        let mut previous = None;
        for _ in 0..=n {
            let next = trigger.next_fire_after(previous, origin).unwrap();
            instants.push(next);
            previous = Some(next);
        }

        assert_eq!(instants.len() as u64, n + 1);
        for pair in instants.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::milliseconds(k as i64));
        }
        assert!(instants.windows(2).all(|pair| pair[1] > pair[0]));
    }
}

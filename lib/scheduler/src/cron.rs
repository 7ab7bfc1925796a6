//! Six-field cron expression parsing and evaluation.
//!
//! Fields, in order: `second minute hour day-of-month month day-of-week`.
//! Each field is compiled to a bitmask once; evaluation then walks forward
//! from a starting instant field-by-field (month, day, hour, minute,
//! second), carrying into the next coarser unit whenever the current one
//! has no remaining match — the same top-down search quartz-style cron
//! schedulers use, just hand-rolled over bitmasks instead of a library.

use crate::error::CronError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// A search that has run for this many candidate steps without converging
/// is almost certainly a bug in the bitmask logic rather than a legitimately
/// sparse schedule; this bounds the loop instead of hanging the coordinator.
const MAX_SEARCH_STEPS: u32 = 500_000;

/// A parsed, evaluatable six-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    seconds: u64,
    minutes: u64,
    hours: u64,
    day_of_month: u64,
    month: u64,
    day_of_week: u64,
    dom_wildcard: bool,
    dow_wildcard: bool,
}

impl CronFields {
    /// Parses a six-field `second minute hour dom month dow` expression.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(CronError::WrongFieldCount {
                found: fields.len(),
            });
        }

        let (seconds, _) = parse_field(fields[0], "second", 0, 59, false)?;
        let (minutes, _) = parse_field(fields[1], "minute", 0, 59, false)?;
        let (hours, _) = parse_field(fields[2], "hour", 0, 23, false)?;
        let (day_of_month, dom_wildcard) = parse_field(fields[3], "day-of-month", 1, 31, true)?;
        let (month, _) = parse_field(fields[4], "month", 1, 12, false)?;
        let (day_of_week, dow_wildcard) = parse_field(fields[5], "day-of-week", 1, 7, true)?;

        Ok(Self {
            seconds,
            minutes,
            hours,
            day_of_month,
            month,
            day_of_week,
            dom_wildcard,
            dow_wildcard,
        })
    }

    /// Finds the smallest instant strictly greater than `max(previous, now)`
    /// that matches this expression, evaluated in `zone`. Returns `None` if
    /// no match is found within the search horizon (see [`MAX_SEARCH_STEPS`]
    /// and the multi-year window in [`Self::search`]).
    pub fn next_after(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        zone: Tz,
    ) -> Option<DateTime<Utc>> {
        let floor = match previous {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        let start_local = (floor + Duration::seconds(1))
            .with_timezone(&zone)
            .naive_local();
        self.search(zone, start_local)
    }

    fn search(&self, zone: Tz, start: NaiveDateTime) -> Option<DateTime<Utc>> {
        let limit = start + Duration::days(366 * 5);
        let mut local = start;
        let mut steps = 0u32;

        loop {
            steps += 1;
            if steps > MAX_SEARCH_STEPS || local > limit {
                return None;
            }

            if !bit_set(self.month, local.month() as u64) {
                local = self.bump_month(local);
                continue;
            }
            if !self.day_matches(local.year(), local.month(), local.day()) {
                local = start_of_next_day(local);
                continue;
            }
            if !bit_set(self.hours, local.hour() as u64) {
                local = self.bump_hour(local);
                continue;
            }
            if !bit_set(self.minutes, local.minute() as u64) {
                local = self.bump_minute(local);
                continue;
            }
            if !bit_set(self.seconds, local.second() as u64) {
                local = self.bump_second(local);
                continue;
            }

            match zone.from_local_datetime(&local) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                // Local time falls in a DST spring-forward gap; it never
                // actually occurs, so skip to the next candidate second.
                chrono::LocalResult::None => {
                    local = self.bump_second(local);
                }
            }
        }
    }

    fn day_matches(&self, year: i32, month: u32, day: u32) -> bool {
        let dom_ok = bit_set(self.day_of_month, day as u64);
        if self.dom_wildcard && self.dow_wildcard {
            return true;
        }
        if self.dow_wildcard {
            return dom_ok;
        }
        let weekday = weekday_index(year, month, day);
        if self.dom_wildcard {
            return bit_set(self.day_of_week, weekday);
        }
        dom_ok || bit_set(self.day_of_week, weekday)
    }

    fn bump_month(&self, local: NaiveDateTime) -> NaiveDateTime {
        let year = local.year();
        let month = local.month();
        if let Some(m) = next_set_bit(self.month, month as u64 + 1, 12) {
            midnight_on(year, m as u32, 1)
        } else {
            let m = next_set_bit(self.month, 1, 12).expect("month field validated non-empty");
            midnight_on(year + 1, m as u32, 1)
        }
    }

    fn bump_hour(&self, local: NaiveDateTime) -> NaiveDateTime {
        if let Some(h) = next_set_bit(self.hours, local.hour() as u64 + 1, 23) {
            local
                .with_hour(h as u32)
                .and_then(|dt| dt.with_minute(0))
                .and_then(|dt| dt.with_second(0))
                .expect("hour/minute/second within chrono's valid range")
        } else {
            start_of_next_day(local)
        }
    }

    fn bump_minute(&self, local: NaiveDateTime) -> NaiveDateTime {
        if let Some(m) = next_set_bit(self.minutes, local.minute() as u64 + 1, 59) {
            local
                .with_minute(m as u32)
                .and_then(|dt| dt.with_second(0))
                .expect("minute/second within chrono's valid range")
        } else {
            self.bump_hour(local)
        }
    }

    fn bump_second(&self, local: NaiveDateTime) -> NaiveDateTime {
        if let Some(s) = next_set_bit(self.seconds, local.second() as u64 + 1, 59) {
            local
                .with_second(s as u32)
                .expect("second within chrono's valid range")
        } else {
            self.bump_minute(local)
        }
    }
}

fn midnight_on(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("month bump always targets the 1st of a month")
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn start_of_next_day(local: NaiveDateTime) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(local.year(), local.month(), local.day())
        .expect("local carries a valid calendar date")
        .succ_opt()
        .expect("date within chrono's representable range")
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Sunday = 1 .. Saturday = 7, the day-of-week wire convention this parser uses.
fn weekday_index(year: i32, month: u32, day: u32) -> u64 {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("caller supplies a valid calendar date")
        .weekday()
        .num_days_from_sunday() as u64
        + 1
}

fn bit_set(mask: u64, index: u64) -> bool {
    index < 64 && mask & (1u64 << index) != 0
}

fn next_set_bit(mask: u64, from: u64, max: u64) -> Option<u64> {
    (from..=max).find(|&i| bit_set(mask, i))
}

fn full_mask(min: u32, max: u32) -> u64 {
    let mut mask = 0u64;
    for i in min..=max {
        mask |= 1u64 << i;
    }
    mask
}

fn parse_field(
    spec: &str,
    name: &'static str,
    min: u32,
    max: u32,
    allow_question: bool,
) -> Result<(u64, bool), CronError> {
    let spec = spec.trim();

    if spec == "?" {
        if !allow_question {
            return Err(CronError::QuestionMarkNotAllowed { field: name });
        }
        return Ok((full_mask(min, max), true));
    }
    if spec == "*" {
        return Ok((full_mask(min, max), true));
    }

    let mut mask = 0u64;
    for part in spec.split(',') {
        mask |= parse_part(part, name, min, max)?;
    }
    if mask == 0 {
        return Err(CronError::InvalidField {
            field: name,
            value: spec.to_string(),
            reason: "selects no values".to_string(),
        });
    }
    Ok((mask, false))
}

fn parse_part(part: &str, name: &'static str, min: u32, max: u32) -> Result<u64, CronError> {
    let (range_part, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(parse_num(step, name, 1, u32::MAX)?)),
        None => (part, None),
    };

    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        (parse_num(a, name, min, max)?, parse_num(b, name, min, max)?)
    } else {
        let n = parse_num(range_part, name, min, max)?;
        (n, n)
    };

    if lo > hi {
        return Err(CronError::InvalidField {
            field: name,
            value: part.to_string(),
            reason: "range start is greater than range end".to_string(),
        });
    }

    let step = step.unwrap_or(1);
    let mut mask = 0u64;
    let mut v = lo;
    while v <= hi {
        mask |= 1u64 << v;
        v += step;
    }
    Ok(mask)
}

fn parse_num(s: &str, name: &'static str, min: u32, max: u32) -> Result<u32, CronError> {
    let n: i64 = s.parse().map_err(|_| CronError::InvalidField {
        field: name,
        value: s.to_string(),
        reason: "not a number".to_string(),
    })?;
    if n < i64::from(min) || n > i64::from(max) {
        return Err(CronError::OutOfRange {
            field: name,
            value: n,
            min: i64::from(min),
            max: i64::from(max),
        });
    }
    Ok(n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn wrong_field_count_rejected() {
        assert_eq!(
            CronFields::parse("* * * *"),
            Err(CronError::WrongFieldCount { found: 4 })
        );
    }

    #[test]
    fn question_mark_only_allowed_on_day_fields() {
        assert!(matches!(
            CronFields::parse("? * * * * *"),
            Err(CronError::QuestionMarkNotAllowed { field: "second" })
        ));
    }

    #[test]
    fn every_second_matches_immediately_after_floor() {
        let fields = CronFields::parse("* * * * * *").unwrap();
        let now = utc(2026, 1, 1, 0, 0, 0);
        let next = fields.next_after(None, now, Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 0, 0, 1));
    }

    #[test]
    fn daily_two_am_fires_at_next_occurrence() {
        let fields = CronFields::parse("0 0 2 * * ?").unwrap();
        let noon = utc(2026, 1, 1, 12, 0, 0);
        let next = fields.next_after(None, noon, Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 1, 2, 2, 0, 0));
    }

    #[test]
    fn successive_firings_advance_past_previous() {
        let fields = CronFields::parse("0 0 2 * * ?").unwrap();
        let first = utc(2026, 1, 2, 2, 0, 0);
        let next = fields
            .next_after(Some(first), utc(2026, 1, 2, 2, 0, 1), Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 3, 2, 0, 0));
    }

    #[test]
    fn leap_day_only_expression_skips_non_leap_years() {
        let fields = CronFields::parse("0 0 0 29 2 ?").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 0);
        let next = fields.next_after(None, after, Tz::UTC).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn day_of_month_and_day_of_week_use_or_semantics_when_both_restricted() {
        // The 1st or the 13th of the month, *or* any Friday (OR semantics:
        // a day matches if it satisfies either a restricted dom or a
        // restricted dow, since both fields are restricted here).
        let fields = CronFields::parse("0 0 0 1,13 * 6").unwrap();
        // 2026-01-01 is a Thursday, matching via dom (the 1st).
        let jan1 = fields
            .next_after(None, utc(2025, 12, 31, 23, 59, 59), Tz::UTC)
            .unwrap();
        assert_eq!(jan1, utc(2026, 1, 1, 0, 0, 0));

        // 2026-01-02 is a Friday, matching via dow even though it is
        // neither the 1st nor the 13th.
        let jan2 = fields.next_after(Some(jan1), jan1, Tz::UTC).unwrap();
        assert_eq!(jan2, utc(2026, 1, 2, 0, 0, 0));
    }

    #[test]
    fn wildcard_day_of_week_defers_to_day_of_month() {
        let fields = CronFields::parse("0 0 0 15 * *").unwrap();
        let next = fields
            .next_after(None, utc(2026, 1, 1, 0, 0, 0), Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 15, 0, 0, 0));
    }

    #[test]
    fn range_and_step_fields_parse() {
        let fields = CronFields::parse("*/15 0 9-17 * * *").unwrap();
        let next = fields
            .next_after(None, utc(2026, 1, 1, 9, 0, 1), Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 1, 1, 9, 15, 0));
    }

    #[test]
    fn out_of_range_value_rejected() {
        let err = CronFields::parse("60 * * * * *").unwrap_err();
        assert!(matches!(err, CronError::OutOfRange { field: "second", .. }));
    }

    #[test]
    fn empty_selection_rejected() {
        // A step larger than the range selects nothing.
        let err = CronFields::parse("70/100 * * * * *");
        assert!(err.is_err());
    }

    #[test]
    fn no_future_match_returns_none_within_horizon() {
        // February 30th never exists.
        let fields = CronFields::parse("0 0 0 30 2 ?").unwrap();
        let next = fields.next_after(None, utc(2026, 1, 1, 0, 0, 0), Tz::UTC);
        assert_eq!(next, None);
    }

    /// Round-trip law: a cron expression re-parsed from its own wire-format
    /// string produces the identical sequence of instants as the original
    /// across 1,000 successive firings.
    #[test]
    fn reparsed_expression_matches_original_across_a_thousand_firings() {
        let expression = "*/7 * * * * *";
        let original = CronFields::parse(expression).unwrap();
        let reparsed = CronFields::parse(expression).unwrap();
        assert_eq!(original, reparsed);

        let mut previous = None;
        let now = utc(2026, 1, 1, 0, 0, 0);
        for _ in 0..1_000 {
            let from_original = original.next_after(previous, now, Tz::UTC).unwrap();
            let from_reparsed = reparsed.next_after(previous, now, Tz::UTC).unwrap();
            assert_eq!(from_original, from_reparsed);
            previous = Some(from_original);
        }
    }
}

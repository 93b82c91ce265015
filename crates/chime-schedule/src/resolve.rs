//! Next-fire-time resolution for canonical schedules.
//!
//! Given a `(ScheduleType, value)` pair and an anchor timestamp, computes
//! the concrete next fire time. Recurring schedules anchor on the last run
//! time rather than "now" so late executions do not drift.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use chime_types::ScheduleType;

use crate::cron::CronExpr;
use crate::ScheduleParseError;

static IN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^in\s+(\d+)\s+(second|minute|hour|day)s?$").expect("static regex")
});
static EVERY_N_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^every\s+(\d+)\s+(second|minute|hour|day)s?$").expect("static regex")
});
static EVERY_UNIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^every\s+(second|minute|hour|day)$").expect("static regex"));

/// Datetime layouts accepted for ABSOLUTE values, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Date-only layouts, interpreted as midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// A parsed relative schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelativeSpec {
    /// "in N unit": fires once.
    Once(Duration),
    /// "every [N] unit": recurs at a fixed interval.
    Every(Duration),
}

/// Compute the first fire time for a freshly created job.
pub fn initial_fire(
    schedule_type: ScheduleType,
    value: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    match schedule_type {
        ScheduleType::Relative => {
            let (RelativeSpec::Once(interval) | RelativeSpec::Every(interval)) =
                parse_relative(value)?;
            Ok(now + interval)
        }
        ScheduleType::Absolute => parse_absolute(value),
        ScheduleType::Cron => {
            let expr = CronExpr::parse(value)?;
            expr.next_after(now)
                .ok_or_else(|| ScheduleParseError::Unsatisfiable(value.to_string()))
        }
    }
}

/// Compute the fire time after a completed run, anchored on the last run
/// time. `Ok(None)` means the schedule is exhausted (one-shot).
pub fn next_fire(
    schedule_type: ScheduleType,
    value: &str,
    anchor: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleParseError> {
    match schedule_type {
        ScheduleType::Relative => match parse_relative(value)? {
            RelativeSpec::Once(_) => Ok(None),
            RelativeSpec::Every(interval) => Ok(Some(anchor + interval)),
        },
        ScheduleType::Absolute => Ok(None),
        ScheduleType::Cron => {
            let expr = CronExpr::parse(value)?;
            expr.next_after(anchor)
                .map(Some)
                .ok_or_else(|| ScheduleParseError::Unsatisfiable(value.to_string()))
        }
    }
}

/// Whether the schedule fires more than once.
pub fn is_recurring(schedule_type: ScheduleType, value: &str) -> bool {
    match schedule_type {
        ScheduleType::Cron => true,
        ScheduleType::Absolute => false,
        ScheduleType::Relative => matches!(parse_relative(value), Ok(RelativeSpec::Every(_))),
    }
}

fn parse_relative(value: &str) -> Result<RelativeSpec, ScheduleParseError> {
    let value = value.trim().to_lowercase();
    if let Some(caps) = IN_PATTERN.captures(&value) {
        return Ok(RelativeSpec::Once(unit_duration(&caps[2], amount(&caps[1], &value)?)));
    }
    if let Some(caps) = EVERY_N_PATTERN.captures(&value) {
        return Ok(RelativeSpec::Every(unit_duration(&caps[2], amount(&caps[1], &value)?)));
    }
    if let Some(caps) = EVERY_UNIT_PATTERN.captures(&value) {
        return Ok(RelativeSpec::Every(unit_duration(&caps[1], 1)));
    }
    Err(ScheduleParseError::Relative(value))
}

fn amount(digits: &str, value: &str) -> Result<i64, ScheduleParseError> {
    digits
        .parse()
        .map_err(|_| ScheduleParseError::Relative(value.to_string()))
}

fn unit_duration(unit: &str, amount: i64) -> Duration {
    match unit {
        "second" => Duration::seconds(amount),
        "minute" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        _ => Duration::days(amount),
    }
}

fn parse_absolute(value: &str) -> Result<DateTime<Utc>, ScheduleParseError> {
    let value = value.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
        }
    }
    // Last resort: RFC 3339 with an explicit offset.
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    Err(ScheduleParseError::Absolute(value.to_string()))
}

//! Natural-language schedule parsing.
//!
//! Converts free-form text into a canonical `(ScheduleType, value)` pair.
//! Patterns are tried in strict priority order and the first match wins:
//! relative offsets, recurring clock times (normalized to cron), absolute
//! times, a bare-cron sniff, then a best-effort RELATIVE fallback whose
//! interpretation is deferred to the resolver.

use chrono::{DateTime, Datelike, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use chime_types::ScheduleType;

use crate::ScheduleParseError;

const TIME_OF_DAY: &str = r"(\d{1,2})(?::(\d{2}))?\s*(am|pm)?";
const WEEKDAY: &str = "(monday|tuesday|wednesday|thursday|friday|saturday|sunday)";

static RELATIVE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^in\s+(\d+)\s+(second|seconds|minute|minutes|hour|hours|day|days)$",
        r"^every\s+(\d+)\s+(second|seconds|minute|minutes|hour|hours|day|days)$",
        r"^every\s+(second|minute|hour|day)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static EVERY_DAY_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^every\s+day\s+at\s+{TIME_OF_DAY}$")).expect("static regex"));
static EVERY_WEEKDAY_NAME_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^every\s+{WEEKDAY}\s+at\s+{TIME_OF_DAY}$")).expect("static regex")
});
static EVERY_WEEKDAY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^every\s+weekday\s+at\s+{TIME_OF_DAY}$")).expect("static regex")
});
static EVERY_WEEKEND_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^every\s+weekend\s+at\s+{TIME_OF_DAY}$")).expect("static regex")
});

static TODAY_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^today\s+at\s+{TIME_OF_DAY}$")).expect("static regex"));
static TOMORROW_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^tomorrow\s+at\s+{TIME_OF_DAY}$")).expect("static regex"));
static NEXT_WEEKDAY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^next\s+{WEEKDAY}\s+at\s+{TIME_OF_DAY}$")).expect("static regex")
});
static EXPLICIT_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\s+(\d{1,2}):(\d{2})$")
        .expect("static regex")
});

/// Parse schedule text against the wall clock.
pub fn parse_schedule_text(text: &str) -> Result<(ScheduleType, String), ScheduleParseError> {
    parse_schedule_text_at(text, Utc::now())
}

/// Parse schedule text against an explicit `now`, used to resolve
/// "today" / "tomorrow" / "next <weekday>" deterministically.
pub fn parse_schedule_text_at(
    text: &str,
    now: DateTime<Utc>,
) -> Result<(ScheduleType, String), ScheduleParseError> {
    let text = text.trim().to_lowercase();

    // 1. Relative offsets keep their original text; the resolver
    //    interprets them.
    if RELATIVE.iter().any(|p| p.is_match(&text)) {
        return Ok((ScheduleType::Relative, text));
    }

    // 2. Recurring clock times normalize to cron.
    if let Some(caps) = EVERY_DAY_AT.captures(&text) {
        let (hour, minute) = clock_time(&caps, 1)?;
        return Ok((ScheduleType::Cron, format!("{minute} {hour} * * *")));
    }
    if let Some(caps) = EVERY_WEEKDAY_NAME_AT.captures(&text) {
        let day = cron_weekday(&caps[1]);
        let (hour, minute) = clock_time(&caps, 2)?;
        return Ok((ScheduleType::Cron, format!("{minute} {hour} * * {day}")));
    }
    if let Some(caps) = EVERY_WEEKDAY_AT.captures(&text) {
        let (hour, minute) = clock_time(&caps, 1)?;
        return Ok((ScheduleType::Cron, format!("{minute} {hour} * * 1-5")));
    }
    if let Some(caps) = EVERY_WEEKEND_AT.captures(&text) {
        let (hour, minute) = clock_time(&caps, 1)?;
        return Ok((ScheduleType::Cron, format!("{minute} {hour} * * 0,6")));
    }

    // 3. Absolute times resolve to a concrete timestamp string.
    if let Some(caps) = TODAY_AT.captures(&text) {
        let (hour, minute) = clock_time(&caps, 1)?;
        let target = at_time(now, 0, hour, minute).ok_or_else(|| absolute_err(&text))?;
        return Ok((ScheduleType::Absolute, format_timestamp(target)));
    }
    if let Some(caps) = TOMORROW_AT.captures(&text) {
        let (hour, minute) = clock_time(&caps, 1)?;
        let target = at_time(now, 1, hour, minute).ok_or_else(|| absolute_err(&text))?;
        return Ok((ScheduleType::Absolute, format_timestamp(target)));
    }
    if let Some(caps) = NEXT_WEEKDAY_AT.captures(&text) {
        let target_day = days_from_monday(&caps[1]);
        let (hour, minute) = clock_time(&caps, 2)?;
        // "next monday" never means today, even on a Monday.
        let mut days_ahead = target_day - i64::from(now.weekday().num_days_from_monday());
        if days_ahead <= 0 {
            days_ahead += 7;
        }
        let target = at_time(now, days_ahead, hour, minute).ok_or_else(|| absolute_err(&text))?;
        return Ok((ScheduleType::Absolute, format_timestamp(target)));
    }
    if EXPLICIT_DATETIME.is_match(&text) {
        // Passed through verbatim; the resolver validates it.
        return Ok((ScheduleType::Absolute, text));
    }

    // 4. Five fields of cron-ish characters: a literal cron expression.
    if looks_like_cron(&text) {
        return Ok((ScheduleType::Cron, text));
    }

    // 5. Best effort: hand the text to the resolver as a relative time.
    Ok((ScheduleType::Relative, text))
}

/// Extract `(hour, minute)` from a time-of-day capture starting at group
/// `base`, applying the 12-hour conversion: pm adds 12 unless the hour is
/// 12, 12am becomes 0, and a missing suffix leaves the hour as written.
fn clock_time(
    caps: &regex::Captures<'_>,
    base: usize,
) -> Result<(u32, u32), ScheduleParseError> {
    let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
    let err = || absolute_err(&text);
    let hour: u32 = caps[base].parse().map_err(|_| err())?;
    let minute: u32 = match caps.get(base + 1) {
        Some(m) => m.as_str().parse().map_err(|_| err())?,
        None => 0,
    };
    let hour = match caps.get(base + 2).map(|m| m.as_str()) {
        Some("pm") if hour != 12 => hour + 12,
        Some("am") if hour == 12 => 0,
        _ => hour,
    };
    if minute > 59 {
        return Err(err());
    }
    Ok((hour, minute))
}

fn absolute_err(text: &str) -> ScheduleParseError {
    ScheduleParseError::Absolute(text.to_string())
}

/// `now + days`, at the given clock time. `None` for unrepresentable
/// hours (e.g. "today at 13pm").
fn at_time(now: DateTime<Utc>, days: i64, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    (now + Duration::days(days))
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Cron weekday number, 0 = Sunday.
fn cron_weekday(name: &str) -> u32 {
    match name {
        "sunday" => 0,
        "monday" => 1,
        "tuesday" => 2,
        "wednesday" => 3,
        "thursday" => 4,
        "friday" => 5,
        _ => 6,
    }
}

/// Weekday offset with Monday = 0, matching chrono's
/// `num_days_from_monday`.
fn days_from_monday(name: &str) -> i64 {
    match name {
        "monday" => 0,
        "tuesday" => 1,
        "wednesday" => 2,
        "thursday" => 3,
        "friday" => 4,
        "saturday" => 5,
        _ => 6,
    }
}

/// Exactly five whitespace-separated fields, each made of digits and the
/// cron punctuation `*` `/` `-` `,`.
fn looks_like_cron(text: &str) -> bool {
    let parts: Vec<&str> = text.split_whitespace().collect();
    parts.len() == 5
        && parts.iter().all(|part| {
            let stripped: String = part
                .chars()
                .filter(|c| !matches!(c, '*' | '/' | '-' | ','))
                .collect();
            *part == "*" || (!stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()))
        })
}

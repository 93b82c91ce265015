//! 5-field cron expression matching and next-occurrence search.
//!
//! Fields: minute, hour, day-of-month, month, day-of-week (0 = Sunday,
//! 7 accepted as Sunday). Supports `*`, single values, ranges `a-b`,
//! lists `a,b,c`, and steps `*/n` / `a-b/n`.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};

use crate::ScheduleParseError;

/// Search horizon for the next occurrence. Covers leap-year-only
/// schedules like "0 0 29 2 *".
const SEARCH_HORIZON_DAYS: i64 = 366 * 4;

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    /// False for a bare `*`. Restriction matters for the day-of-month /
    /// day-of-week combination rule.
    restricted: bool,
    /// Sorted, deduplicated allowed values. Empty when unrestricted.
    values: Vec<u32>,
}

impl CronField {
    fn any() -> Self {
        Self {
            restricted: false,
            values: Vec::new(),
        }
    }

    fn matches(&self, value: u32) -> bool {
        !self.restricted || self.values.binary_search(&value).is_ok()
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse a cron expression like `"0 9 * * 1-5"`.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let err = || ScheduleParseError::Cron(expr.to_string());
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err());
        }

        let mut parsed = Self {
            minute: parse_field(fields[0], 0, 59).ok_or_else(err)?,
            hour: parse_field(fields[1], 0, 23).ok_or_else(err)?,
            day_of_month: parse_field(fields[2], 1, 31).ok_or_else(err)?,
            month: parse_field(fields[3], 1, 12).ok_or_else(err)?,
            day_of_week: parse_field(fields[4], 0, 7).ok_or_else(err)?,
        };

        // Cron allows both 0 and 7 for Sunday; fold onto 0.
        if parsed.day_of_week.restricted {
            for v in &mut parsed.day_of_week.values {
                if *v == 7 {
                    *v = 0;
                }
            }
            parsed.day_of_week.values.sort_unstable();
            parsed.day_of_week.values.dedup();
        }

        Ok(parsed)
    }

    /// Whether the given timestamp satisfies every field (at minute
    /// granularity; seconds are ignored).
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minute.matches(t.minute()) && self.hour.matches(t.hour()) && self.day_matches(t)
    }

    /// Month plus the day-of-month / day-of-week rule: when both are
    /// restricted they are OR-combined; otherwise an unrestricted field
    /// imposes no constraint.
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        if !self.month.matches(t.month()) {
            return false;
        }
        let dom = self.day_of_month.matches(t.day());
        let dow = self.day_of_week.matches(t.weekday().num_days_from_sunday());
        match (self.day_of_week.restricted, self.day_of_month.restricted) {
            (true, true) => dom || dow,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => true,
        }
    }

    /// Earliest matching timestamp strictly greater than `after`, at
    /// minute granularity. Skips non-matching days wholesale; a pure
    /// function of the expression and the anchor. `None` when nothing
    /// matches within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= horizon {
            if !self.day_matches(t) {
                t = start_of_next_day(t)?;
                continue;
            }
            if !self.hour.matches(t.hour()) {
                t = start_of_next_hour(t)?;
                continue;
            }
            if self.minute.matches(t.minute()) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse one field over the inclusive `min..=max` domain. `None` on any
/// syntax or range violation.
fn parse_field(raw: &str, min: u32, max: u32) -> Option<CronField> {
    if raw == "*" {
        return Some(CronField::any());
    }

    let mut values = Vec::new();
    for part in raw.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((b, s)) => (b, s.parse::<u32>().ok().filter(|&n| n > 0)?),
            None => (part, 1),
        };
        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let v = base.parse().ok()?;
            (v, v)
        };
        if lo < min || hi > max || lo > hi {
            return None;
        }
        values.extend((lo..=hi).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    Some(CronField {
        restricted: true,
        values,
    })
}

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_next_hour(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    truncate_to_minute(t)?
        .with_minute(0)?
        .checked_add_signed(Duration::hours(1))
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = t.date_naive().succ_opt()?;
    Some(Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(CronExpr::parse("0 9 * *").is_err());
        assert!(CronExpr::parse("0 9 * * 1-5 0").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("a b c d e").is_err());
        assert!(CronExpr::parse("0 9 * * 8").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
    }

    #[test]
    fn test_weekday_schedule_skips_weekend() {
        // Saturday 2026-01-03 10:00 anchor: next weekday 9am is Monday the
        // 5th, not Sunday.
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        let next = expr.next_after(utc(2026, 1, 3, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 5, 9, 0));
    }

    #[test]
    fn test_next_is_strictly_greater() {
        let expr = CronExpr::parse("30 6 * * *").unwrap();
        // Anchored exactly on a match, the next fire is the following day.
        let next = expr.next_after(utc(2026, 1, 5, 6, 30)).unwrap();
        assert_eq!(next, utc(2026, 1, 6, 6, 30));
    }

    #[test]
    fn test_next_after_is_idempotent() {
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        let anchor = utc(2026, 1, 3, 10, 0);
        let a = expr.next_after(anchor);
        let b = expr.next_after(anchor);
        assert_eq!(a, b);
    }

    #[test]
    fn test_step_and_list_fields() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 5, 6, 1)).unwrap(),
            utc(2026, 1, 5, 6, 15)
        );

        let expr = CronExpr::parse("0 0 1,15 * *").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 2, 0, 0)).unwrap(),
            utc(2026, 1, 15, 0, 0)
        );
        assert_eq!(
            expr.next_after(utc(2026, 1, 15, 0, 0)).unwrap(),
            utc(2026, 2, 1, 0, 0)
        );
    }

    #[test]
    fn test_dom_dow_or_combination() {
        // 13th of the month OR any Friday.
        let expr = CronExpr::parse("0 0 13 * 5").unwrap();
        // From Mon 2026-01-05: Friday the 9th comes before the 13th.
        assert_eq!(
            expr.next_after(utc(2026, 1, 5, 0, 0)).unwrap(),
            utc(2026, 1, 9, 0, 0)
        );
        // From Sat the 10th: the 13th (a Tuesday) comes before Friday the 16th.
        assert_eq!(
            expr.next_after(utc(2026, 1, 10, 0, 0)).unwrap(),
            utc(2026, 1, 13, 0, 0)
        );
    }

    #[test]
    fn test_unrestricted_day_fields_impose_nothing() {
        let expr = CronExpr::parse("0 12 * * *").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 5, 13, 0)).unwrap(),
            utc(2026, 1, 6, 12, 0)
        );
    }

    #[test]
    fn test_month_rollover() {
        let expr = CronExpr::parse("0 9 1 * *").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 31, 23, 59)).unwrap(),
            utc(2026, 2, 1, 9, 0)
        );
    }

    #[test]
    fn test_sunday_as_seven() {
        let a = CronExpr::parse("0 8 * * 7").unwrap();
        let b = CronExpr::parse("0 8 * * 0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_leap_day_schedule() {
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 3, 1, 0, 0)).unwrap(),
            utc(2028, 2, 29, 0, 0)
        );
    }

    #[test]
    fn test_matches_ignores_seconds() {
        let expr = CronExpr::parse("30 6 * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2026, 1, 5, 6, 30, 45).unwrap();
        assert!(expr.matches(t));
    }
}

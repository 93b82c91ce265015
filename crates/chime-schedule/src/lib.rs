//! chime-schedule: Schedule text parsing and next-fire-time resolution.
//!
//! Three layers:
//! - [`parse`] turns free-form text ("every day at 9am") into a canonical
//!   `(ScheduleType, value)` pair.
//! - [`cron`] matches 5-field cron expressions against timestamps.
//! - [`resolve`] computes concrete fire times from a canonical schedule
//!   and an anchor timestamp.

pub mod cron;
pub mod parse;
pub mod resolve;

pub use cron::CronExpr;
pub use parse::{parse_schedule_text, parse_schedule_text_at};
pub use resolve::{initial_fire, is_recurring, next_fire};

use thiserror::Error;

/// A schedule value that does not resolve to a valid schedule. Carries the
/// offending text; surfaced to the caller before any job is persisted.
#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("invalid relative time: {0:?}")]
    Relative(String),
    #[error("invalid absolute time: {0:?}")]
    Absolute(String),
    #[error("invalid cron expression: {0:?}")]
    Cron(String),
    #[error("cron expression never fires: {0:?}")]
    Unsatisfiable(String),
}

//! chime-types: Core job model shared by every chime crate.
//!
//! A [`Job`] is the unit of schedulable work: a schedule (relative,
//! absolute, or cron), a named callback, and the retry-aware status
//! state machine the engine drives.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default retry budget for run-time callback failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ──────────────────── Schedule & Status Enums ────────────────────

/// How a job's `schedule_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Offset from now, e.g. "in 5 minutes" or "every 1 hour".
    Relative,
    /// A concrete timestamp, e.g. "2026-05-28 15:00". One-shot.
    Absolute,
    /// A 5-field cron expression, e.g. "0 9 * * 1-5".
    Cron,
}

impl ScheduleType {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Relative => "relative",
            ScheduleType::Absolute => "absolute",
            ScheduleType::Cron => "cron",
        }
    }
}

impl FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relative" => Ok(ScheduleType::Relative),
            "absolute" => Ok(ScheduleType::Absolute),
            "cron" => Ok(ScheduleType::Cron),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next fire time.
    Pending,
    /// Callback dispatched, not yet completed.
    Running,
    /// Last run succeeded. Terminal for one-shot schedules.
    Completed,
    /// Last run failed. Terminal once retries are exhausted.
    Failed,
    /// Removed from scheduling by the caller.
    Cancelled,
}

impl JobStatus {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── Callback Name ────────────────────

/// Qualified callback target, stored on the job as two string fields so
/// persisted jobs stay portable across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackName {
    pub module: String,
    pub function: String,
}

impl CallbackName {
    /// Module used when a bare function name is given.
    pub const DEFAULT_MODULE: &'static str = "main";

    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }

    /// Parse a `"module.function"` string. Splits on the last dot; a name
    /// with no dot lands in the `main` sentinel module.
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('.') {
            Some((module, function)) => Self::new(module, function),
            None => Self::new(Self::DEFAULT_MODULE, raw),
        }
    }

    /// The `"module.function"` form.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

impl fmt::Display for CallbackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}

/// Keyword arguments passed to a callback at dispatch time.
pub type CallbackArgs = HashMap<String, serde_json::Value>;

// ──────────────────── Job ────────────────────

/// A persisted scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier, generated at creation, immutable.
    pub id: String,
    /// Human label, not unique.
    pub name: String,
    /// How `schedule_value` is interpreted.
    pub schedule_type: ScheduleType,
    /// The type-specific canonical schedule string.
    pub schedule_value: String,
    /// Next timestamp at which the job should be considered. Null only
    /// before first resolution; advanced monotonically for recurring jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_time: Option<DateTime<Utc>>,
    /// Callback module name.
    pub callback_module: String,
    /// Callback function name.
    pub callback_function: String,
    /// Arguments passed to the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_args: Option<CallbackArgs>,
    /// False = paused; never evaluated for readiness.
    pub is_active: bool,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// When the job last ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
    /// Free-text outcome of the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_result: Option<String>,
    /// Failed-run counter; only increments on a FAILED outcome.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque caller-owned metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Job {
    fn create(
        name: &str,
        schedule_type: ScheduleType,
        schedule_value: &str,
        callback: CallbackName,
        callback_args: Option<CallbackArgs>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            schedule_type,
            schedule_value: schedule_value.to_string(),
            next_run_time: None,
            callback_module: callback.module,
            callback_function: callback.function,
            callback_args,
            is_active: true,
            status: JobStatus::Pending,
            last_run_time: None,
            last_run_result: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// New relative-time job (e.g. "in 5 minutes", "every 1 hour").
    pub fn relative(
        name: &str,
        relative_time: &str,
        callback: CallbackName,
        callback_args: Option<CallbackArgs>,
    ) -> Self {
        Self::create(
            name,
            ScheduleType::Relative,
            relative_time,
            callback,
            callback_args,
        )
    }

    /// New absolute-time job (e.g. "2026-05-28 15:00").
    pub fn absolute(
        name: &str,
        absolute_time: &str,
        callback: CallbackName,
        callback_args: Option<CallbackArgs>,
    ) -> Self {
        Self::create(
            name,
            ScheduleType::Absolute,
            absolute_time,
            callback,
            callback_args,
        )
    }

    /// New cron-expression job (e.g. "0 9 * * 1-5").
    pub fn cron(
        name: &str,
        cron_expression: &str,
        callback: CallbackName,
        callback_args: Option<CallbackArgs>,
    ) -> Self {
        Self::create(
            name,
            ScheduleType::Cron,
            cron_expression,
            callback,
            callback_args,
        )
    }

    /// The job's callback target.
    pub fn callback_name(&self) -> CallbackName {
        CallbackName::new(&self.callback_module, &self.callback_function)
    }

    /// True iff the job failed and still has retry budget left.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && self.status == JobStatus::Failed
    }

    /// Readiness predicate against an explicit clock, so it is a pure
    /// function of the job and `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        let Some(next_run) = self.next_run_time else {
            return false;
        };
        if now < next_run {
            return false;
        }
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Failed => self.can_retry(),
            _ => false,
        }
    }

    /// Readiness against the wall clock.
    pub fn is_ready_to_run(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Record a run outcome: sets `status`, `last_run_time`,
    /// `last_run_result`, refreshes `updated_at`, and increments
    /// `retry_count` on a failure. Persistence is the caller's job.
    pub fn update_status(&mut self, status: JobStatus, result: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.last_run_time = Some(now);
        self.last_run_result = result;
        self.updated_at = now;
        if status == JobStatus::Failed {
            self.retry_count += 1;
        }
    }

    /// Refresh `updated_at` after a field mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

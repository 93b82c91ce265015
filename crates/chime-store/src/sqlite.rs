//! SQLite-backed job storage.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use chime_types::{Job, JobStatus, ScheduleType};

use crate::{JobStore, Result, StoreError};

const SCHEMA: &str = "PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    schedule_type TEXT NOT NULL,
    schedule_value TEXT NOT NULL,
    next_run_time TEXT,
    callback_module TEXT NOT NULL,
    callback_function TEXT NOT NULL,
    callback_args TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'pending',
    last_run_time TEXT,
    last_run_result TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs (is_active, next_run_time);";

const JOB_COLUMNS: &str = "id, name, schedule_type, schedule_value, next_run_time, \
     callback_module, callback_function, callback_args, is_active, status, \
     last_run_time, last_run_result, retry_count, max_retries, created_at, updated_at, metadata";

/// Durable job storage over a single SQLite connection.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Job store opened: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn query_jobs(&self, sql: String) -> Result<Vec<Job>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map([], job_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await?
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let conn = self.conn.clone();
        let job = job.clone();
        let callback_args = encode_map(job.callback_args.as_ref())?;
        let metadata = encode_map(job.metadata.as_ref())?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO jobs (id, name, schedule_type, schedule_value, next_run_time,
                     callback_module, callback_function, callback_args, is_active, status,
                     last_run_time, last_run_result, retry_count, max_retries, created_at, updated_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    job.id,
                    job.name,
                    job.schedule_type.as_str(),
                    job.schedule_value,
                    job.next_run_time.map(|t| t.to_rfc3339()),
                    job.callback_module,
                    job.callback_function,
                    callback_args,
                    job.is_active as i64,
                    job.status.as_str(),
                    job.last_run_time.map(|t| t.to_rfc3339()),
                    job.last_run_result,
                    job.retry_count,
                    job.max_retries,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    metadata,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))?;
            let job = stmt
                .query_row(rusqlite::params![id], job_from_row)
                .optional()?;
            Ok(job)
        })
        .await?
    }

    async fn list(&self) -> Result<Vec<Job>> {
        self.query_jobs(format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))
            .await
    }

    async fn list_active(&self) -> Result<Vec<Job>> {
        self.query_jobs(format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE is_active = 1 ORDER BY next_run_time"
        ))
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![id])?;
            Ok(count > 0)
        })
        .await?
    }
}

fn encode_map(
    map: Option<&std::collections::HashMap<String, serde_json::Value>>,
) -> std::result::Result<Option<String>, StoreError> {
    map.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule_type: parse_col::<ScheduleType>(row, 2)?,
        schedule_value: row.get(3)?,
        next_run_time: parse_opt_time(row, 4)?,
        callback_module: row.get(5)?,
        callback_function: row.get(6)?,
        callback_args: parse_opt_json(row, 7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        status: parse_col::<JobStatus>(row, 9)?,
        last_run_time: parse_opt_time(row, 10)?,
        last_run_result: row.get(11)?,
        retry_count: row.get(12)?,
        max_retries: row.get(13)?,
        created_at: parse_time(row, 14)?,
        updated_at: parse_time(row, 15)?,
        metadata: parse_opt_json(row, 16)?,
    })
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_col<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_err(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_err(idx, format!("{e}")))
}

fn parse_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| s.parse().map_err(|e| conversion_err(idx, format!("{e}"))))
        .transpose()
}

fn parse_opt_json(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<std::collections::HashMap<String, serde_json::Value>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(idx, format!("{e}"))))
        .transpose()
}

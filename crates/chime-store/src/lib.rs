//! chime-store: Job persistence.
//!
//! The store is the source of truth for job state; the engine is
//! rebuildable from it. [`SqliteJobStore`] is the durable implementation;
//! [`MemoryJobStore`] backs tests and embedded use. All job fields are
//! preserved verbatim: enums as their string form, timestamps as RFC 3339
//! text, and the optional argument/metadata maps as embedded JSON text
//! (NULL when absent, never an empty-object placeholder).

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;

use chime_types::Job;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence contract consumed by the engine and the service facade.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job by id.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// All jobs, including paused and terminal ones.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Jobs with `is_active = true`, the engine's scan view.
    async fn list_active(&self) -> Result<Vec<Job>>;

    /// Remove a job entirely. Returns whether a record existed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

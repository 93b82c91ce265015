//! chime-service: The public scheduling API.
//!
//! Composes the parser, resolver, store, dispatcher, and engine behind a
//! small facade. Scheduling entry points validate both the schedule and
//! the callback before anything is persisted; a failed validation never
//! creates a dead job.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chime_dispatch::CallbackRegistry;
use chime_engine::{Engine, EngineConfig};
use chime_schedule::{parse_schedule_text, resolve, ScheduleParseError};
use chime_store::{JobStore, StoreError};
use chime_types::{CallbackArgs, CallbackName, Job, ScheduleType};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Parse(#[from] ScheduleParseError),
    #[error("unknown callback: {0}")]
    UnknownCallback(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Job scheduling service: the single entry point for callers such as a
/// CLI or a chat-tool layer.
pub struct SchedulerService {
    store: Arc<dyn JobStore>,
    callbacks: Arc<CallbackRegistry>,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    engine_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn JobStore>,
        callbacks: Arc<CallbackRegistry>,
        config: EngineConfig,
    ) -> Self {
        let engine = Arc::new(Engine::new(store.clone(), callbacks.clone(), config));
        Self {
            store,
            callbacks,
            engine,
            shutdown: CancellationToken::new(),
            engine_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Resolve stored jobs and start the engine loop in the background.
    pub async fn start(&self) -> Result<()> {
        self.engine.prepare().await?;
        let handle = tokio::spawn(self.engine.clone().run(self.shutdown.clone()));
        *self.engine_task.lock().await = Some(handle);
        info!("Scheduler service started");
        Ok(())
    }

    /// Stop the engine loop. In-flight callbacks are not interrupted.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.engine_task.lock().await.take() {
            let _ = handle.await;
        }
        info!("Scheduler service stopped");
    }

    // ─── Scheduling ─────────────────────────────────────────

    /// Schedule from a relative expression like "in 5 minutes" or
    /// "every 1 hour".
    pub async fn schedule_relative(
        &self,
        name: &str,
        relative_time: &str,
        callback: &str,
        callback_args: Option<CallbackArgs>,
    ) -> Result<String> {
        self.schedule(name, ScheduleType::Relative, relative_time, callback, callback_args)
            .await
    }

    /// Schedule for a concrete timestamp like "2026-05-28 15:00".
    pub async fn schedule_absolute(
        &self,
        name: &str,
        absolute_time: &str,
        callback: &str,
        callback_args: Option<CallbackArgs>,
    ) -> Result<String> {
        self.schedule(name, ScheduleType::Absolute, absolute_time, callback, callback_args)
            .await
    }

    /// Schedule from a cron expression like "0 9 * * 1-5".
    pub async fn schedule_cron(
        &self,
        name: &str,
        cron_expression: &str,
        callback: &str,
        callback_args: Option<CallbackArgs>,
    ) -> Result<String> {
        self.schedule(name, ScheduleType::Cron, cron_expression, callback, callback_args)
            .await
    }

    /// Parse natural-language text like "tomorrow at 3pm" or "every
    /// monday at 8am" and schedule accordingly.
    pub async fn schedule_from_text(
        &self,
        name: &str,
        schedule_text: &str,
        callback: &str,
        callback_args: Option<CallbackArgs>,
    ) -> Result<String> {
        let (schedule_type, value) = parse_schedule_text(schedule_text)?;
        self.schedule(name, schedule_type, &value, callback, callback_args)
            .await
    }

    async fn schedule(
        &self,
        name: &str,
        schedule_type: ScheduleType,
        value: &str,
        callback: &str,
        callback_args: Option<CallbackArgs>,
    ) -> Result<String> {
        let callback = CallbackName::parse(callback);
        // Fail fast on a dead callback, before anything is stored.
        self.callbacks
            .resolve(&callback)
            .map_err(|_| ServiceError::UnknownCallback(callback.qualified()))?;

        let mut job = match schedule_type {
            ScheduleType::Relative => Job::relative(name, value, callback, callback_args),
            ScheduleType::Absolute => Job::absolute(name, value, callback, callback_args),
            ScheduleType::Cron => Job::cron(name, value, callback, callback_args),
        };
        job.next_run_time = Some(resolve::initial_fire(schedule_type, value, Utc::now())?);

        self.store.put(&job).await?;
        info!(
            job_id = %job.id,
            name = %job.name,
            schedule = %format!("{}:{}", job.schedule_type, job.schedule_value),
            "Scheduled job"
        );
        Ok(job.id)
    }

    // ─── Inspection & lifecycle ─────────────────────────────

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.store.list().await?)
    }

    /// Delete a job. A callback already in flight finishes on its own;
    /// its late result is discarded.
    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!(job_id = %id, "Cancelled job");
        }
        Ok(removed)
    }

    /// Deactivate a job without deleting it.
    pub async fn pause_job(&self, id: &str) -> Result<bool> {
        let Some(mut job) = self.store.get(id).await? else {
            return Ok(false);
        };
        job.is_active = false;
        job.touch();
        self.store.put(&job).await?;
        info!(job_id = %id, "Paused job");
        Ok(true)
    }

    /// Reactivate a paused job. A fire time that went stale while paused
    /// is recomputed from now.
    pub async fn resume_job(&self, id: &str) -> Result<bool> {
        let Some(mut job) = self.store.get(id).await? else {
            return Ok(false);
        };
        job.is_active = true;
        let now = Utc::now();
        if job.next_run_time.map_or(true, |next| next <= now) {
            job.next_run_time =
                Some(resolve::initial_fire(job.schedule_type, &job.schedule_value, now)?);
        }
        job.touch();
        self.store.put(&job).await?;
        info!(job_id = %id, "Resumed job");
        Ok(true)
    }

    /// Flat status summary for external inspection.
    pub async fn job_status(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let Some(job) = self.store.get(id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::json!({
            "id": job.id,
            "name": job.name,
            "status": job.status.as_str(),
            "is_active": job.is_active,
            "schedule_type": job.schedule_type.as_str(),
            "schedule_value": job.schedule_value,
            "next_run_time": job.next_run_time.map(|t| t.to_rfc3339()),
            "last_run_time": job.last_run_time.map(|t| t.to_rfc3339()),
            "last_run_result": job.last_run_result,
            "retry_count": job.retry_count,
            "max_retries": job.max_retries,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chime_store::MemoryJobStore;
    use chime_types::JobStatus;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            tick_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            dispatch_timeout: Duration::from_secs(5),
            retry_backoff: Duration::ZERO,
        }
    }

    fn service() -> (SchedulerService, Arc<MemoryJobStore>, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryJobStore::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut registry = CallbackRegistry::new();
        let c = counter.clone();
        registry.register_fn("reports.send_daily", move |_args| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Some("report sent".to_string())) })
        });
        registry.register_fn("reports.always_fails", |_args| {
            Box::pin(async {
                Err(chime_dispatch::DispatchError::Execution("smtp down".into()))
            })
        });

        let service =
            SchedulerService::new(store.clone(), Arc::new(registry), fast_config());
        (service, store, counter)
    }

    #[tokio::test]
    async fn test_schedule_from_text_absolute() {
        let (service, store, _) = service();
        let id = service
            .schedule_from_text("daily report", "tomorrow at 3pm", "reports.send_daily", None)
            .await
            .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.schedule_type, ScheduleType::Absolute);
        assert_eq!(job.status, JobStatus::Pending);
        let next = job.next_run_time.unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "15:00:00");
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn test_schedule_from_text_cron() {
        let (service, store, _) = service();
        let id = service
            .schedule_from_text("weekday check", "every weekday at 6:30am", "reports.send_daily", None)
            .await
            .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.schedule_type, ScheduleType::Cron);
        assert_eq!(job.schedule_value, "30 6 * * 1-5");
        assert!(job.next_run_time.is_some());
    }

    #[tokio::test]
    async fn test_unknown_callback_fails_fast() {
        let (service, store, _) = service();
        let err = service
            .schedule_relative("reminder", "in 5 minutes", "reports.nonexistent", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownCallback(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_schedule_creates_no_job() {
        let (service, store, _) = service();
        let err = service
            .schedule_from_text("reminder", "in five minutes", "reports.send_daily", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Parse(_)));
        assert!(store.list().await.unwrap().is_empty());

        let err = service
            .schedule_cron("bad", "not a cron", "reports.send_daily", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Parse(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_and_pause_and_resume() {
        let (service, store, _) = service();
        let id = service
            .schedule_cron("daily", "0 9 * * *", "reports.send_daily", None)
            .await
            .unwrap();

        assert!(service.pause_job(&id).await.unwrap());
        assert!(!store.get(&id).await.unwrap().unwrap().is_active);

        assert!(service.resume_job(&id).await.unwrap());
        let resumed = store.get(&id).await.unwrap().unwrap();
        assert!(resumed.is_active);
        assert!(resumed.next_run_time.unwrap() > Utc::now());

        assert!(service.cancel_job(&id).await.unwrap());
        assert!(service.get_job(&id).await.unwrap().is_none());
        assert!(!service.cancel_job(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_resume_recomputes_stale_fire_time() {
        let (service, store, _) = service();
        let id = service
            .schedule_relative("check", "every 1 hour", "reports.send_daily", None)
            .await
            .unwrap();
        service.pause_job(&id).await.unwrap();

        // Simulate a long pause: fire time now in the past.
        let mut job = store.get(&id).await.unwrap().unwrap();
        job.next_run_time = Some(Utc::now() - chrono::Duration::hours(2));
        store.put(&job).await.unwrap();

        service.resume_job(&id).await.unwrap();
        let resumed = store.get(&id).await.unwrap().unwrap();
        assert!(resumed.next_run_time.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_job_status_summary() {
        let (service, _, _) = service();
        let id = service
            .schedule_cron("daily", "0 9 * * 1-5", "reports.send_daily", None)
            .await
            .unwrap();

        let status = service.job_status(&id).await.unwrap().unwrap();
        assert_eq!(status["name"], "daily");
        assert_eq!(status["status"], "pending");
        assert_eq!(status["schedule_type"], "cron");
        assert_eq!(status["schedule_value"], "0 9 * * 1-5");
        assert_eq!(status["retry_count"], 0);
        assert!(status["next_run_time"].is_string());
        assert!(status["last_run_time"].is_null());

        assert!(service.job_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_one_shot_fires_once() {
        let (service, store, counter) = service();
        let id = service
            .schedule_relative("soon", "in 1 second", "reports.send_daily", None)
            .await
            .unwrap();

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        service.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.last_run_result.as_deref(), Some("report sent"));
        assert!(!job.is_active);
    }

    #[tokio::test]
    async fn test_end_to_end_failures_exhaust_retries() {
        let (service, store, _) = service();
        let id = service
            .schedule_relative("doomed", "every 30 minutes", "reports.always_fails", None)
            .await
            .unwrap();

        // Pull the first fire into the past instead of waiting 30 minutes.
        let mut job = store.get(&id).await.unwrap().unwrap();
        job.next_run_time = Some(Utc::now() - chrono::Duration::seconds(1));
        store.put(&job).await.unwrap();

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        service.shutdown().await;

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, job.max_retries);
        assert!(!job.is_active);
        assert!(job.last_run_result.unwrap().contains("smtp down"));
    }
}

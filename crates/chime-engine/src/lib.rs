//! chime-engine: The background scheduling loop.
//!
//! On every tick the engine scans the store's active view, marks ready
//! jobs RUNNING, and dispatches their callbacks on spawned tasks so one
//! slow callback never delays the scan. Completions feed the resolver for
//! the next occurrence; failures drive bounded, linearly backed-off
//! retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chime_dispatch::{CallbackRegistry, DispatchError};
use chime_schedule::resolve;
use chime_store::JobStore;
use chime_types::{Job, JobStatus};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scan cadence.
    pub tick_interval: Duration,
    /// Sleep before the next scan after a storage failure.
    pub error_backoff: Duration,
    /// Bound on a single callback invocation. On expiry the engine stops
    /// waiting and accounts a failure; in-flight work is not killed.
    pub dispatch_timeout: Duration,
    /// Base delay for the linear retry backoff: the nth retry waits
    /// n x base.
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            dispatch_timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(300),
        }
    }
}

/// Single scheduling authority over a job store.
pub struct Engine {
    store: Arc<dyn JobStore>,
    callbacks: Arc<CallbackRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        callbacks: Arc<CallbackRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            callbacks,
            config,
        }
    }

    /// Fill in missing fire times for stored jobs, e.g. after a restart
    /// with a store written by an older process. A job whose schedule no
    /// longer resolves stays unscheduled and is logged.
    pub async fn prepare(&self) -> Result<(), chime_store::StoreError> {
        let jobs = self.store.list_active().await?;
        let now = Utc::now();
        let mut scheduled = 0usize;
        for mut job in jobs {
            if job.next_run_time.is_some() {
                continue;
            }
            match resolve::initial_fire(job.schedule_type, &job.schedule_value, now) {
                Ok(next) => {
                    job.next_run_time = Some(next);
                    job.touch();
                    self.store.put(&job).await?;
                    scheduled += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, name = %job.name, "Unresolvable schedule: {e}");
                }
            }
        }
        if scheduled > 0 {
            info!("Assigned fire times to {scheduled} stored jobs");
        }
        Ok(())
    }

    /// Run the scan loop until the token is cancelled. Storage failures
    /// are transient: logged, then retried on the next tick.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Scheduling engine started");
        loop {
            let sleep = match self.clone().tick().await {
                Ok(()) => self.config.tick_interval,
                Err(e) => {
                    warn!("Scan tick failed, retrying next tick: {e}");
                    self.config.error_backoff
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        info!("Scheduling engine stopped");
    }

    /// One scan: mark each ready job RUNNING (persisted before dispatch,
    /// so the next tick cannot double-fire it) and hand its callback to
    /// an independent task.
    async fn tick(self: Arc<Self>) -> Result<(), chime_store::StoreError> {
        let now = Utc::now();
        for mut job in self.store.list_active().await? {
            if !job.is_ready_at(now) {
                continue;
            }
            job.status = JobStatus::Running;
            job.touch();
            self.store.put(&job).await?;

            let engine = Arc::clone(&self);
            tokio::spawn(async move { engine.execute_job(job).await });
        }
        Ok(())
    }

    async fn execute_job(&self, mut job: Job) {
        debug!(job_id = %job.id, name = %job.name, "Dispatching job");

        let mut args = job.callback_args.clone().unwrap_or_default();
        args.insert("job_id".to_string(), serde_json::json!(job.id));
        args.insert("job_name".to_string(), serde_json::json!(job.name));

        let callback_name = job.callback_name();
        let invocation = self.callbacks.invoke(&callback_name, args);
        let outcome = match tokio::time::timeout(self.config.dispatch_timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.config.dispatch_timeout.as_secs())),
        };

        match outcome {
            Ok(result) => self.complete_job(&mut job, result),
            Err(e) => self.fail_job(&mut job, e),
        }

        self.finish_job(job).await;
    }

    /// COMPLETED; recurring schedules go back to PENDING with a fresh
    /// fire time anchored on the run that just finished.
    fn complete_job(&self, job: &mut Job, result: Option<String>) {
        job.update_status(JobStatus::Completed, result);
        if !resolve::is_recurring(job.schedule_type, &job.schedule_value) {
            job.is_active = false;
            return;
        }
        let anchor = job.last_run_time.unwrap_or_else(Utc::now);
        match resolve::next_fire(job.schedule_type, &job.schedule_value, anchor) {
            Ok(Some(next)) => {
                job.next_run_time = Some(next);
                job.status = JobStatus::Pending;
                job.touch();
            }
            Ok(None) => job.is_active = false,
            Err(e) => {
                warn!(job_id = %job.id, "Schedule stopped resolving, deactivating: {e}");
                job.is_active = false;
            }
        }
    }

    /// FAILED; with retry budget left the job re-queues with a linear
    /// backoff, otherwise it is terminal and its fire time stops
    /// advancing.
    fn fail_job(&self, job: &mut Job, error: DispatchError) {
        warn!(job_id = %job.id, name = %job.name, "Job failed: {error}");
        job.update_status(JobStatus::Failed, Some(error.to_string()));
        if job.can_retry() {
            let delay = chrono::Duration::from_std(self.config.retry_backoff * job.retry_count)
                .unwrap_or_else(|_| chrono::Duration::zero());
            job.next_run_time = Some(Utc::now() + delay);
            job.status = JobStatus::Pending;
            job.touch();
        } else {
            job.is_active = false;
        }
    }

    /// Persist the post-run state. A job deleted while its callback was
    /// in flight no longer exists in the store: the late result is a
    /// logged no-op. A concurrent pause wins over the run outcome.
    async fn finish_job(&self, mut job: Job) {
        match self.store.get(&job.id).await {
            Ok(Some(current)) => {
                if !current.is_active {
                    job.is_active = false;
                }
                if let Err(e) = self.store.put(&job).await {
                    warn!(job_id = %job.id, "Failed to persist run outcome: {e}");
                }
            }
            Ok(None) => {
                debug!(job_id = %job.id, "Job removed mid-flight, dropping late result");
            }
            Err(e) => {
                warn!(job_id = %job.id, "Failed to re-check job before persist: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chime_store::MemoryJobStore;
    use chime_types::CallbackName;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            tick_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            dispatch_timeout: Duration::from_secs(5),
            retry_backoff: Duration::ZERO,
        }
    }

    struct Fixture {
        store: Arc<MemoryJobStore>,
        engine: Arc<Engine>,
        counter: Arc<AtomicUsize>,
    }

    /// Store + engine with `test.ok`, `test.fail`, and `test.slow`
    /// callbacks; the counter tracks total invocations.
    fn fixture(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut registry = CallbackRegistry::new();
        let c = counter.clone();
        registry.register_fn("test.ok", move |_args| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Some("done".to_string())) })
        });
        let c = counter.clone();
        registry.register_fn("test.fail", move |_args| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(DispatchError::Execution("boom".into())) })
        });
        let c = counter.clone();
        registry.register_fn("test.slow", move |_args| {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            })
        });

        let engine = Arc::new(Engine::new(
            store.clone(),
            Arc::new(registry),
            config,
        ));
        Fixture {
            store,
            engine,
            counter,
        }
    }

    fn due_job(schedule_type_value: (&str, &str), callback: &str) -> Job {
        let (kind, value) = schedule_type_value;
        let mut job = match kind {
            "cron" => Job::cron("test", value, CallbackName::parse(callback), None),
            "absolute" => Job::absolute("test", value, CallbackName::parse(callback), None),
            _ => Job::relative("test", value, CallbackName::parse(callback), None),
        };
        job.next_run_time = Some(Utc::now() - chrono::Duration::seconds(1));
        job
    }

    async fn run_for(fixture: &Fixture, millis: u64) {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(fixture.engine.clone().run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(millis)).await;
        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_one_shot_job_completes_and_stays_terminal() {
        let f = fixture(fast_config());
        let job = due_job(("relative", "in 1 second"), "test.ok");
        f.store.put(&job).await.unwrap();

        run_for(&f, 200).await;

        assert_eq!(f.counter.load(Ordering::SeqCst), 1);
        let done = f.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.last_run_result.as_deref(), Some("done"));
        assert!(!done.is_active);
        assert!(done.last_run_time.is_some());
    }

    #[tokio::test]
    async fn test_recurring_job_goes_back_to_pending() {
        let f = fixture(fast_config());
        let job = due_job(("relative", "every 1 hour"), "test.ok");
        f.store.put(&job).await.unwrap();

        run_for(&f, 200).await;

        assert_eq!(f.counter.load(Ordering::SeqCst), 1);
        let requeued = f.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert!(requeued.is_active);
        // Next fire anchors on the completed run, an hour out.
        let anchor = requeued.last_run_time.unwrap();
        assert_eq!(requeued.next_run_time.unwrap(), anchor + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_failing_job_exhausts_retries() {
        let f = fixture(fast_config());
        let job = due_job(("relative", "every 30 minutes"), "test.fail");
        f.store.put(&job).await.unwrap();

        run_for(&f, 400).await;

        // Initial run plus two retries, then terminal.
        assert_eq!(f.counter.load(Ordering::SeqCst), 3);
        let failed = f.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert!(!failed.is_active);
        assert!(failed.last_run_result.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_paused_job_never_runs() {
        let f = fixture(fast_config());
        let mut job = due_job(("relative", "in 1 second"), "test.ok");
        job.is_active = false;
        f.store.put(&job).await.unwrap();

        run_for(&f, 150).await;

        assert_eq!(f.counter.load(Ordering::SeqCst), 0);
        let untouched = f.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut config = fast_config();
        config.dispatch_timeout = Duration::from_millis(50);
        config.retry_backoff = Duration::from_secs(600);
        let f = fixture(config);
        let job = due_job(("relative", "every 1 hour"), "test.slow");
        f.store.put(&job).await.unwrap();

        run_for(&f, 250).await;

        assert_eq!(f.counter.load(Ordering::SeqCst), 1);
        let failed = f.store.get(&job.id).await.unwrap().unwrap();
        // Back to pending with one retry accounted and a backoff delay.
        assert_eq!(failed.status, JobStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_run_result.unwrap().contains("timed out"));
        assert!(failed.next_run_time.unwrap() > Utc::now() + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_slow_callback_does_not_block_other_jobs() {
        let f = fixture(fast_config());
        let slow = due_job(("relative", "in 1 second"), "test.slow");
        f.store.put(&slow).await.unwrap();
        let quick = due_job(("relative", "in 1 second"), "test.ok");
        f.store.put(&quick).await.unwrap();

        run_for(&f, 200).await;

        let done = f.store.get(&quick.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        let in_flight = f.store.get(&slow.id).await.unwrap().unwrap();
        assert_eq!(in_flight.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_job_deleted_mid_flight_is_a_no_op() {
        let mut config = fast_config();
        config.dispatch_timeout = Duration::from_millis(80);
        let f = fixture(config);
        let job = due_job(("relative", "in 1 second"), "test.slow");
        f.store.put(&job).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(f.engine.clone().run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Delete while the callback is still in flight.
        assert!(f.store.delete(&job.id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        let _ = handle.await;

        // The late failure was dropped, not re-persisted.
        assert!(f.store.get(&job.id).await.unwrap().is_none());
        assert!(f.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_assigns_missing_fire_times() {
        let f = fixture(fast_config());
        let job = Job::relative("later", "in 2 hours", CallbackName::parse("test.ok"), None);
        assert!(job.next_run_time.is_none());
        f.store.put(&job).await.unwrap();

        f.engine.prepare().await.unwrap();

        let prepared = f.store.get(&job.id).await.unwrap().unwrap();
        let next = prepared.next_run_time.unwrap();
        assert!(next > Utc::now() + chrono::Duration::minutes(119));
    }

    #[tokio::test]
    async fn test_cron_job_reschedules_from_cron_expression() {
        let f = fixture(fast_config());
        let job = due_job(("cron", "0 9 * * 1-5"), "test.ok");
        f.store.put(&job).await.unwrap();

        run_for(&f, 200).await;

        let requeued = f.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        let next = requeued.next_run_time.unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.format("%H:%M").to_string(), "09:00");
    }
}

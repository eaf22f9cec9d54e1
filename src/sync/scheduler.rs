//! Periodic runner for the synchronization job
//!
//! Runs a [`Syncable`] job after an initial delay, then again after each
//! interval plus a random jitter, until a shutdown signal is received. The
//! next run is scheduled from the end of the previous one, so runs never
//! overlap.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::error::AppError;

use super::orchestrator::RunReport;

/// Status of the scheduled job
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// When the last run finished
    pub last_run: Option<SystemTime>,
    /// Report of the last run, or its error message
    pub last_result: Option<Result<RunReport, String>>,
    /// Next scheduled run
    pub next_run: Option<SystemTime>,
    /// Whether a run is in progress
    pub in_progress: bool,
    /// Number of runs performed
    pub runs: u64,
}

/// A job the scheduler can run
#[async_trait]
pub trait Syncable: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Perform one full run
    async fn sync(&self) -> Result<RunReport, AppError>;
}

/// Scheduler for the synchronization job
pub struct SyncScheduler {
    config: ScheduleConfig,
    job: Arc<dyn Syncable>,
    status: Arc<RwLock<SyncStatus>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SyncScheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Delay, interval and jitter settings
    /// * `job` - The job to run
    /// * `shutdown_rx` - Broadcast receiver for shutdown signal
    pub fn new(
        config: ScheduleConfig,
        job: Arc<dyn Syncable>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            job,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            shutdown_rx,
        }
    }

    /// Shared handle on the job status
    pub fn status_handle(&self) -> Arc<RwLock<SyncStatus>> {
        self.status.clone()
    }

    /// Run until shutdown
    ///
    /// A run in progress is not interrupted by the scheduler; the job itself
    /// is expected to stop at its next safe point.
    pub async fn run(mut self) {
        let name = self.job.name().to_string();
        info!(
            job = name,
            interval_secs = self.config.interval_secs,
            "Starting sync scheduler"
        );

        if self.config.initial_delay_secs > 0 {
            debug!(
                delay_secs = self.config.initial_delay_secs,
                "Waiting for initial delay"
            );
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received before first run");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)) => {}
            }
        }

        loop {
            Self::perform_sync(&self.job, &self.status).await;

            let wait = self.next_wait();
            self.status.write().await.next_run = Some(SystemTime::now() + wait);
            debug!(job = name, wait_secs = wait.as_secs(), "Scheduled next run");

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Sync scheduler stopped");
    }

    fn next_wait(&self) -> Duration {
        let jitter = if self.config.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..self.config.jitter_secs)
        } else {
            0
        };
        Duration::from_secs(self.config.interval_secs + jitter)
    }

    async fn perform_sync(job: &Arc<dyn Syncable>, status: &Arc<RwLock<SyncStatus>>) {
        let name = job.name().to_string();
        status.write().await.in_progress = true;

        info!(job = name, "Performing scheduled sync");
        let result = job.sync().await;

        let mut status = status.write().await;
        status.in_progress = false;
        status.last_run = Some(SystemTime::now());
        status.runs += 1;

        match result {
            Ok(report) => {
                info!(
                    job = name,
                    records_updated = report.records_updated(),
                    "Scheduled sync completed"
                );
                status.last_result = Some(Ok(report));
            }
            Err(err) => {
                warn!(job = name, error = %err, "Scheduled sync failed");
                status.last_result = Some(Err(err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;

    /// Job double counting its runs and returning a fixed result
    struct TestJob {
        runs: Arc<AtomicU32>,
        fail: bool,
    }

    impl TestJob {
        fn new() -> Self {
            Self {
                runs: Arc::new(AtomicU32::new(0)),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn runs(&self) -> Arc<AtomicU32> {
            self.runs.clone()
        }
    }

    #[async_trait]
    impl Syncable for TestJob {
        fn name(&self) -> &str {
            "test"
        }

        async fn sync(&self) -> Result<RunReport, AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::PartitionsFailed(2))
            } else {
                Ok(RunReport::default())
            }
        }
    }

    fn config(interval_secs: u64) -> ScheduleConfig {
        ScheduleConfig {
            initial_delay_secs: 0,
            jitter_secs: 0,
            interval_secs,
        }
    }

    // Test 1: First run happens on startup
    #[tokio::test]
    async fn test_initial_run_on_startup() {
        let job = TestJob::new();
        let runs = job.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(config(3600), Arc::new(job), shutdown_rx);
        let status = scheduler.status_handle();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        let _ = timeout(Duration::from_secs(1), handle).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let status = status.read().await;
        assert_eq!(status.runs, 1);
        assert!(matches!(status.last_result, Some(Ok(_))));
        assert!(status.next_run.is_some());
    }

    // Test 2: Runs repeat after the interval
    #[tokio::test]
    async fn test_runs_repeat_after_interval() {
        tokio::time::pause();

        let job = TestJob::new();
        let runs = job.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(config(100), Arc::new(job), shutdown_rx);
        let handle = tokio::spawn(scheduler.run());

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(101)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 3: Shutdown during the initial delay skips the first run
    #[tokio::test]
    async fn test_shutdown_during_initial_delay() {
        let job = TestJob::new();
        let runs = job.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(
            ScheduleConfig {
                initial_delay_secs: 3600,
                ..config(3600)
            },
            Arc::new(job),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        let result = timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    // Test 4: A failed run is recorded and the scheduler keeps going
    #[tokio::test]
    async fn test_failed_run_recorded() {
        let job = TestJob::failing();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(config(3600), Arc::new(job), shutdown_rx);
        let status = scheduler.status_handle();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let status = status.read().await;
            assert!(!status.in_progress);
            match &status.last_result {
                Some(Err(msg)) => assert!(msg.contains("2 partition(s) failed")),
                other => panic!("Expected failed run, got {:?}", other),
            }
        }

        shutdown_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    // Test 5: Jitter stays within the configured range
    #[test]
    fn test_next_wait_with_jitter() {
        let (_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = SyncScheduler::new(
            ScheduleConfig {
                initial_delay_secs: 0,
                jitter_secs: 10,
                interval_secs: 60,
            },
            Arc::new(TestJob::new()),
            shutdown_rx,
        );

        for _ in 0..50 {
            let wait = scheduler.next_wait();
            assert!(wait >= Duration::from_secs(60));
            assert!(wait < Duration::from_secs(70));
        }
    }
}

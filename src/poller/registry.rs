//! Scheduled sweeps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::poller::{PollEngine, PollError, Schedule};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// Engine name.
    pub name: String,
    /// Schedule description.
    pub schedule: String,
}

/// Drives [`PollEngine::sweep`] on a schedule.
///
/// Uses `tokio-cron-scheduler` for job scheduling. Engines are closed on
/// shutdown, which closes every connection they hold.
pub struct PollRegistry {
    scheduler: JobScheduler,
    jobs: Arc<RwLock<HashMap<uuid::Uuid, JobInfo>>>,
    engines: RwLock<HashMap<uuid::Uuid, Arc<PollEngine>>>,
}

impl PollRegistry {
    /// Create a new registry.
    pub async fn new() -> Result<Self, PollError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| PollError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            engines: RwLock::new(HashMap::new()),
        })
    }
}

impl std::fmt::Debug for PollRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRegistry")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl PollRegistry {
    /// Register an engine to sweep on `schedule`.
    pub async fn spawn(
        &self,
        name: impl Into<String>,
        engine: Arc<PollEngine>,
        schedule: &Schedule,
    ) -> Result<uuid::Uuid, PollError> {
        let name = name.into();
        let job = create_job(Arc::clone(&engine), &name, schedule)
            .inspect_err(|e| tracing::error!(engine = %name, error = %e, "Job create failed"))?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| PollError::Scheduler(e.to_string()))
            .inspect_err(|e| tracing::error!(engine = %name, error = %e, "Job register failed"))?;

        self.jobs.write().await.insert(
            job_id,
            JobInfo {
                id: job_id,
                name: name.clone(),
                schedule: schedule.to_string(),
            },
        );
        self.engines.write().await.insert(job_id, engine);

        tracing::info!(engine = %name, job_id = %job_id, schedule = %schedule, "Engine registered");
        Ok(job_id)
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), PollError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| PollError::Scheduler(e.to_string()))?;
        tracing::info!("Poll scheduler started");
        Ok(())
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Gracefully shutdown with default timeout.
    pub async fn shutdown(self) -> Result<(), PollError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop the scheduler, then close every engine's connections.
    ///
    /// A scheduler that does not stop within `timeout` is logged and left
    /// behind; connections are closed either way.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), PollError> {
        let job_count = self.jobs.read().await.len();
        let shutdown_result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| PollError::Scheduler(e.to_string()))
        })
        .await;

        let engines: Vec<Arc<PollEngine>> = self.engines.write().await.drain().map(|(_, e)| e).collect();
        for engine in &engines {
            engine.close().await;
        }

        match shutdown_result {
            Ok(Ok(())) => {
                tracing::info!(job_count, "Poll scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(job_count, error = %e, "Poll scheduler shutdown failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(job_count, "Poll scheduler shutdown timed out");
                Ok(())
            }
        }
    }

    /// Remove a job by ID. The engine's connections stay open.
    pub async fn remove(&self, job_id: &uuid::Uuid) -> Result<(), PollError> {
        self.scheduler
            .remove(job_id)
            .await
            .map_err(|e| PollError::Scheduler(e.to_string()))
            .inspect_err(|e| tracing::error!(job_id = %job_id, error = %e, "Job remove failed"))?;

        self.jobs.write().await.remove(job_id);
        self.engines.write().await.remove(job_id);
        tracing::info!(job_id = %job_id, "Engine removed");
        Ok(())
    }
}

fn create_job(engine: Arc<PollEngine>, name: &str, schedule: &Schedule) -> Result<Job, PollError> {
    let name = name.to_owned();

    let make_callback = move || {
        move |_: uuid::Uuid, _: JobScheduler| {
            let (engine, name) = (Arc::clone(&engine), name.clone());
            Box::pin(async move { run_sweep(&engine, &name).await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, make_callback()),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr, make_callback()),
    }
    .map_err(|e| PollError::Scheduler(e.to_string()))
}

/// Execute one sweep and log the result.
async fn run_sweep(engine: &PollEngine, name: &str) {
    let start = std::time::Instant::now();
    tracing::debug!(engine = %name, "Running sweep");

    let report = engine.sweep().await;
    let duration_ms = start.elapsed().as_millis();

    if report.failed > 0 || report.cancelled > 0 {
        tracing::warn!(
            engine = %name,
            duration_ms,
            scheduled = report.scheduled,
            failed = report.failed,
            cancelled = report.cancelled,
            "Sweep finished with failures"
        );
    } else {
        tracing::debug!(
            engine = %name,
            duration_ms,
            scheduled = report.scheduled,
            samples = report.samples,
            "Sweep succeeded"
        );
    }
}

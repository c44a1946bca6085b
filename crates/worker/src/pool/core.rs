use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use renec_core::{JobMode, Shutdown};
use renec_queue::{Job, JobOutcome, JobQueue, JobStats, JobStatus, Lane, QueueError};
use renec_reconcile::ReconciliationEngine;

use super::execution::Attempt;
use super::settings::WorkerSettings;
use crate::error::WorkerError;
use crate::extractor::Extractor;
use crate::job_log::{JobLog, JobLogEntry};

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub mode: JobMode,
    pub lane: Lane,
    pub attempt: u32,
    /// Queue status after reporting: terminal, or `pending` when a retry
    /// was scheduled or the job was released.
    pub status: JobStatus,
    pub stats: JobStats,
    pub error: Option<String>,
}

/// Executors for both lanes, sharing one queue, engine and extractor.
pub struct WorkerPool {
    pub(super) queue: Arc<dyn JobQueue>,
    pub(super) engine: Arc<ReconciliationEngine>,
    pub(super) extractor: Arc<dyn Extractor>,
    pub(super) settings: WorkerSettings,
    job_log: Option<JobLog>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        engine: Arc<ReconciliationEngine>,
        extractor: Arc<dyn Extractor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            engine,
            extractor,
            settings,
            job_log: None,
        }
    }

    pub fn with_job_log(mut self, log: JobLog) -> Self {
        self.job_log = Some(log);
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Start every lane's workers. Each stops claiming once `shutdown`
    /// triggers; a job running at that moment is released back to pending.
    pub fn spawn(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let lanes = [
            (Lane::Harvest, self.settings.harvest_workers),
            (Lane::Monitoring, self.settings.monitoring_workers),
        ];
        let mut handles = Vec::new();
        for (lane, count) in lanes {
            for index in 0..count {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    pool.worker_loop(lane, index, shutdown).await;
                }));
            }
        }
        info!(
            harvest = self.settings.harvest_workers,
            monitoring = self.settings.monitoring_workers,
            extractor = self.extractor.name(),
            "worker pool started"
        );
        handles
    }

    async fn worker_loop(self: Arc<Self>, lane: Lane, index: usize, shutdown: Shutdown) {
        info!(lane = %lane, worker = index, "worker started");
        while !shutdown.is_triggered() {
            match self.run_next(lane, &shutdown).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(lane = %lane, worker = index, error = %e, "worker iteration failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.wait() => break,
            }
        }
        info!(lane = %lane, worker = index, "worker stopped");
    }

    /// Claim and run at most one job from `lane`.
    pub async fn run_next(&self, lane: Lane, shutdown: &Shutdown) -> Result<Option<JobReport>, WorkerError> {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        let Some(job) = self.queue.claim(lane).await? else {
            return Ok(None);
        };
        info!(
            job_id = %job.id,
            mode = %job.spec.mode,
            lane = %lane,
            attempt = job.attempt,
            max_attempts = job.spec.max_attempts,
            scope = %job.spec.scope.label(),
            "job claimed"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let attempt = self.execute(&job, shutdown).await;

        let (status, stats, error) = match attempt {
            Attempt::Released(stats) => {
                let status = match self.queue.release(job.id, job.attempt).await {
                    Ok(()) => {
                        info!(job_id = %job.id, reconciled = stats.records_reconciled, "job released on shutdown");
                        JobStatus::Pending
                    }
                    Err(e) => discard_report(&job, e)?,
                };
                (status, stats, None)
            }
            Attempt::Finished(outcome) => {
                let stats = outcome.stats();
                let error = match &outcome {
                    JobOutcome::Failed { error, .. } => Some(error.clone()),
                    _ => None,
                };
                let status = match self.queue.complete(job.id, job.attempt, outcome).await {
                    Ok(status) => {
                        log_status(job.id, job.attempt, status, &stats, error.as_deref());
                        status
                    }
                    Err(e) => discard_report(&job, e)?,
                };
                (status, stats, error)
            }
        };

        let report = JobReport {
            job_id: job.id,
            mode: job.spec.mode,
            lane,
            attempt: job.attempt,
            status,
            stats,
            error,
        };
        self.append_log(&report, started_at, clock.elapsed().as_millis() as u64);
        Ok(Some(report))
    }

    fn append_log(&self, report: &JobReport, started_at: DateTime<Utc>, duration_ms: u64) {
        let Some(log) = &self.job_log else {
            return;
        };
        log.append(&JobLogEntry {
            job_id: report.job_id,
            mode: report.mode,
            lane: report.lane,
            attempt: report.attempt,
            status: report.status,
            records_reconciled: report.stats.records_reconciled,
            records_rejected: report.stats.records_rejected,
            records_skipped: report.stats.records_skipped,
            duration_ms,
            started_at,
            finished_at: Utc::now(),
            error: report.error.clone(),
        });
    }
}

/// A report for an attempt the queue has moved past (lease expired and
/// the job was reclaimed or finished) is dropped. Returns the job's
/// current status; any other queue error propagates.
fn discard_report(job: &Job, error: QueueError) -> Result<JobStatus, WorkerError> {
    let QueueError::StaleAttempt { current, status, .. } = error else {
        return Err(error.into());
    };
    warn!(
        job_id = %job.id,
        attempt = job.attempt,
        current_attempt = current,
        status = %status,
        "attempt report discarded"
    );
    Ok(status)
}

fn log_status(job_id: Uuid, attempt: u32, status: JobStatus, stats: &JobStats, error: Option<&str>) {
    match status {
        JobStatus::Failed => error!(
            job_id = %job_id,
            attempt,
            error = error.unwrap_or("unknown"),
            "job permanently failed"
        ),
        JobStatus::Pending => warn!(
            job_id = %job_id,
            attempt,
            error = error.unwrap_or("unknown"),
            "job attempt failed, retry scheduled"
        ),
        _ => info!(
            job_id = %job_id,
            status = %status,
            reconciled = stats.records_reconciled,
            rejected = stats.records_rejected,
            skipped = stats.records_skipped,
            "job finished"
        ),
    }
}

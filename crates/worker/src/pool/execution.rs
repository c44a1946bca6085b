use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use renec_core::Shutdown;
use renec_queue::{Job, JobOutcome, JobStats, Lane};
use renec_reconcile::{ReconcileError, RunContext};

use super::core::WorkerPool;
use crate::error::ExtractionError;

/// How an attempt ended, before it is reported to the queue.
pub(super) enum Attempt {
    Finished(JobOutcome),
    /// Shutdown interrupted the attempt; hand the job back.
    Released(JobStats),
}

fn failed(stats: JobStats, error: impl ToString) -> Attempt {
    Attempt::Finished(JobOutcome::Failed {
        stats,
        error: error.to_string(),
        retryable: true,
    })
}

impl WorkerPool {
    pub(super) async fn execute(&self, job: &Job, shutdown: &Shutdown) -> Attempt {
        if job.spec.mode.is_harvest() {
            self.harvest(job, shutdown).await
        } else {
            self.health_check(job).await
        }
    }

    /// Ping the store and sample lane depth. Never touches entity state.
    async fn health_check(&self, job: &Job) -> Attempt {
        let store = self.engine.store();
        if let Err(e) = store.ping().await {
            warn!(job_id = %job.id, error = %e, "health check: store unreachable");
            return failed(JobStats::default(), e);
        }
        let harvest = match self.queue.depth(Lane::Harvest).await {
            Ok(d) => d,
            Err(e) => return failed(JobStats::default(), e),
        };
        let monitoring = match self.queue.depth(Lane::Monitoring).await {
            Ok(d) => d,
            Err(e) => return failed(JobStats::default(), e),
        };
        let entities: u64 = match store.counts().await {
            Ok(counts) => counts.values().sum(),
            Err(e) => return failed(JobStats::default(), e),
        };
        info!(
            job_id = %job.id,
            harvest_pending = harvest.pending,
            harvest_running = harvest.running,
            monitoring_pending = monitoring.pending,
            entities,
            "health check passed"
        );
        Attempt::Finished(JobOutcome::Succeeded(JobStats::default()))
    }

    /// Stream the extractor's records through the engine one at a time.
    ///
    /// Cancellation is checked before every record and again before
    /// full-run finalization. Extractor errors other than undecodable
    /// records, the deadline and store failures fail the attempt; records
    /// reconciled before it stay. The deadline covers reading, reconciling
    /// and finalization alike. Finalization only runs once the stream has
    /// ended cleanly.
    async fn harvest(&self, job: &Job, shutdown: &Shutdown) -> Attempt {
        let mode = job.spec.mode;
        let started_at = job.started_at.unwrap_or_else(Utc::now);
        let ctx = RunContext::new(mode, job.spec.scope.clone(), started_at).with_job(job.id);
        let deadline = Instant::now() + Duration::from_secs(job.spec.timeout_secs);
        let timed_out = |stats| failed(stats, ExtractionError::Timeout(job.spec.timeout_secs));

        let mut stream = self.extractor.extract(mode, &job.spec.scope);
        let mut stats = JobStats::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return Attempt::Released(stats),
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };
            let item = match next {
                Err(_) => return timed_out(stats),
                Ok(None) => break,
                Ok(Some(item)) => item,
            };

            if self.cancel_requested(job).await {
                info!(job_id = %job.id, reconciled = stats.records_reconciled, "job cancelled between records");
                return Attempt::Finished(JobOutcome::Cancelled(stats));
            }

            let record = match item {
                Ok(record) => record,
                Err(ExtractionError::Malformed { entity, message, .. }) => {
                    self.engine.reject_undecodable(entity.as_ref(), &message, &ctx);
                    stats.records_rejected += 1;
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, reconciled = stats.records_reconciled, "extractor failed");
                    return failed(stats, e);
                }
            };

            let reconciled = match tokio::time::timeout_at(deadline, self.engine.reconcile(&record, &ctx)).await {
                Ok(result) => result,
                Err(_) => return timed_out(stats),
            };
            match reconciled {
                Ok(outcome) if outcome.is_skipped() => stats.records_skipped += 1,
                Ok(_) => stats.records_reconciled += 1,
                Err(ReconcileError::Rejected(_)) => stats.records_rejected += 1,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "store failure during reconciliation");
                    return failed(stats, e);
                }
            }
        }

        if ctx.keeps_ledger() {
            if self.cancel_requested(job).await {
                info!(job_id = %job.id, reconciled = stats.records_reconciled, "job cancelled before finalization");
                return Attempt::Finished(JobOutcome::Cancelled(stats));
            }
            match tokio::time::timeout_at(deadline, self.engine.finish_full_run(&ctx)).await {
                Ok(Ok(summary)) => debug!(job_id = %job.id, ?summary, "full run finalized"),
                Ok(Err(e)) => return failed(stats, e),
                Err(_) => return timed_out(stats),
            }
        }
        Attempt::Finished(JobOutcome::from_stats(stats))
    }

    /// A failed check counts as not requested; the queue still turns a
    /// late success into `cancelled`.
    async fn cancel_requested(&self, job: &Job) -> bool {
        match self.queue.is_cancel_requested(job.id).await {
            Ok(requested) => requested,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "cancel check failed");
                false
            }
        }
    }
}

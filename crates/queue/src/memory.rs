//! In-process queue backend.
//!
//! Holds every job in a mutex-guarded map. Suitable for single-process
//! deployments and tests; durability comes from the Postgres backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{Enqueued, Job, JobFilter, JobOutcome, JobSnapshot, JobSpec, JobStatus, Lane, LaneDepth};
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    dedup: HashMap<String, Uuid>,
}

pub struct MemoryJobQueue {
    state: Mutex<MemoryState>,
    policy: RetryPolicy,
}

impl MemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            policy,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, QueueError> {
        self.state
            .lock()
            .map_err(|e| QueueError::Backend(format!("queue lock poisoned: {e}")))
    }

    /// Full job records, for tests and diagnostics.
    pub fn jobs(&self) -> Vec<Job> {
        match self.state.lock() {
            Ok(state) => state.jobs.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().jobs.values().cloned().collect(),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<Enqueued, QueueError> {
        let mut state = self.lock()?;
        let job = Job::new(spec, Utc::now());

        if let Some(key) = &job.dedup_key {
            if let Some(existing) = state.dedup.get(key) {
                debug!(dedup_key = %key, job_id = %existing, "duplicate enqueue absorbed");
                return Ok(Enqueued::Duplicate(*existing));
            }
            state.dedup.insert(key.clone(), job.id);
        }

        let id = job.id;
        info!(job_id = %id, mode = %job.spec.mode, lane = %job.spec.lane, "job enqueued");
        state.jobs.insert(id, job);
        Ok(Enqueued::Created(id))
    }

    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        for job in state.jobs.values_mut() {
            if job.spec.lane == lane && job.lease_expired(now) {
                let status = job.expire_lease(&self.policy, now)?;
                warn!(job_id = %job.id, attempt = job.attempt, status = %status, "job lease expired");
            }
        }

        let next = state
            .jobs
            .values()
            .filter(|j| j.spec.lane == lane && j.is_claimable(now))
            .min_by_key(|j| (j.available_at, j.enqueued_at))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.start_attempt(now, &self.policy)?;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: Uuid, attempt: u32, outcome: JobOutcome) -> Result<JobStatus, QueueError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.ensure_attempt(attempt)?;
        job.apply_outcome(outcome, &self.policy, Utc::now())
    }

    async fn release(&self, job_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.ensure_attempt(attempt)?;
        job.release(Utc::now())
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<JobStatus, QueueError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.request_cancel(Utc::now())
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let state = self.lock()?;
        state
            .jobs
            .get(&job_id)
            .map(|j| j.cancel_requested)
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, QueueError> {
        let state = self.lock()?;
        Ok(state.jobs.get(&job_id).map(Job::snapshot))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobSnapshot>, QueueError> {
        let state = self.lock()?;
        let mut jobs: Vec<&Job> = state.jobs.values().filter(|j| filter.matches(j)).collect();
        jobs.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        Ok(jobs
            .into_iter()
            .take(filter.effective_limit())
            .map(Job::snapshot)
            .collect())
    }

    async fn depth(&self, lane: Lane) -> Result<LaneDepth, QueueError> {
        let state = self.lock()?;
        let mut depth = LaneDepth::default();
        for job in state.jobs.values().filter(|j| j.spec.lane == lane) {
            match job.status {
                JobStatus::Pending => depth.pending += 1,
                JobStatus::Running => depth.running += 1,
                _ => {}
            }
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStats;
    use chrono::DateTime;
    use renec_core::{JobMode, Scope};

    fn slot() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn probe_spec() -> JobSpec {
        JobSpec::scheduled("daily-probe", JobMode::Probe, Lane::Harvest, Scope::all(), slot())
    }

    #[tokio::test]
    async fn same_slot_enqueued_twice_yields_one_job() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        let first = queue.enqueue(probe_spec()).await.unwrap();
        let second = queue.enqueue(probe_spec()).await.unwrap();
        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.job_id(), second.job_id());
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn on_demand_jobs_are_never_deduplicated() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        let spec = JobSpec::on_demand(JobMode::Probe, Lane::Harvest, Scope::all());
        queue.enqueue(spec.clone()).await.unwrap();
        queue.enqueue(spec).await.unwrap();
        assert_eq!(queue.jobs().len(), 2);
    }

    #[tokio::test]
    async fn lanes_are_independent() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        queue.enqueue(probe_spec()).await.unwrap();
        assert!(queue.claim(Lane::Monitoring).await.unwrap().is_none());
        let job = queue.claim(Lane::Harvest).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(queue.claim(Lane::Harvest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_until_cap_then_permanent_failure() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        let spec = probe_spec().with_limits(3, 60);
        let id = queue.enqueue(spec).await.unwrap().job_id();

        for attempt in 1..=3 {
            let job = queue.claim(Lane::Harvest).await.unwrap().expect("claimable");
            assert_eq!(job.attempt, attempt);
            queue
                .complete(
                    id,
                    attempt,
                    JobOutcome::Failed { stats: JobStats::default(), error: "timed out".into(), retryable: true },
                )
                .await
                .unwrap();
        }

        assert!(queue.claim(Lane::Harvest).await.unwrap().is_none());
        let snapshot = queue.get(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempt, 3);
        assert_eq!(snapshot.last_error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn cancel_pending_job_prevents_claim() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        let id = queue.enqueue(probe_spec()).await.unwrap().job_id();
        assert_eq!(queue.request_cancel(id).await.unwrap(), JobStatus::Cancelled);
        assert!(queue.claim(Lane::Harvest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status_and_depth_counts() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        queue.enqueue(probe_spec()).await.unwrap();
        queue
            .enqueue(JobSpec::on_demand(JobMode::HealthCheck, Lane::Monitoring, Scope::all()))
            .await
            .unwrap();
        queue.claim(Lane::Harvest).await.unwrap();

        let running = queue
            .list(&JobFilter { status: Some(JobStatus::Running), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].mode, JobMode::Probe);

        let depth = queue.depth(Lane::Monitoring).await.unwrap();
        assert_eq!(depth, LaneDepth { pending: 1, running: 0 });
    }

    #[tokio::test]
    async fn released_job_is_claimable_again() {
        let queue = MemoryJobQueue::new(RetryPolicy::immediate());
        let id = queue.enqueue(probe_spec()).await.unwrap().job_id();
        let claimed = queue.claim(Lane::Harvest).await.unwrap().unwrap();
        queue.release(id, claimed.attempt).await.unwrap();
        let job = queue.claim(Lane::Harvest).await.unwrap().unwrap();
        assert_eq!(job.attempt, 1);
    }

    #[tokio::test]
    async fn late_report_from_an_expired_attempt_is_discarded() {
        let queue = MemoryJobQueue::new(RetryPolicy::new(
            std::time::Duration::ZERO,
            std::time::Duration::ZERO,
            std::time::Duration::ZERO,
        ));
        // Zero timeout and grace: the lease is already expired at the next claim.
        let id = queue.enqueue(probe_spec().with_limits(3, 0)).await.unwrap().job_id();
        let first = queue.claim(Lane::Harvest).await.unwrap().unwrap();
        let second = queue.claim(Lane::Harvest).await.unwrap().unwrap();
        assert_eq!((first.attempt, second.attempt), (1, 2));

        let stale = JobStats { records_reconciled: 99, ..Default::default() };
        let err = queue.complete(id, first.attempt, JobOutcome::Succeeded(stale)).await.unwrap_err();
        assert!(matches!(err, QueueError::StaleAttempt { attempt: 1, current: 2, .. }));
        assert!(matches!(
            queue.release(id, first.attempt).await,
            Err(QueueError::StaleAttempt { .. })
        ));

        let fresh = JobStats { records_reconciled: 3, ..Default::default() };
        let status = queue.complete(id, second.attempt, JobOutcome::Succeeded(fresh)).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert_eq!(queue.get(id).await.unwrap().unwrap().records_reconciled, 3);
    }
}

//! Job descriptors and the attempt state machine.
//!
//! ```text
//! pending ──claim──▶ running ──▶ succeeded | partial | cancelled
//!    ▲                  │
//!    └──retryable fail──┤
//!                       └──attempts exhausted──▶ failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use renec_core::{JobMode, Scope};

use crate::error::QueueError;
use crate::retry::RetryPolicy;

// ── Lanes ────────────────────────────────────────────────────────────

/// Logically independent channels, so long harvests never starve
/// monitoring checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Harvest,
    Monitoring,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Harvest => "harvest",
            Lane::Monitoring => "monitoring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "harvest" => Some(Lane::Harvest),
            "monitoring" => Some(Lane::Monitoring),
            _ => None,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Spec ─────────────────────────────────────────────────────────────

/// Who asked for the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOrigin {
    /// Fired by a cron trigger for one schedule slot.
    Scheduled { trigger: String, slot: DateTime<Utc> },
    /// Ad-hoc request; never deduplicated against the schedule.
    OnDemand { requested_by: Option<String> },
}

/// Everything a worker needs to run a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub mode: JobMode,
    pub lane: Lane,
    pub scope: Scope,
    pub origin: JobOrigin,
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Maximum duration of a single attempt.
    pub timeout_secs: u64,
}

impl JobSpec {
    pub fn scheduled(
        trigger: impl Into<String>,
        mode: JobMode,
        lane: Lane,
        scope: Scope,
        slot: DateTime<Utc>,
    ) -> Self {
        Self {
            mode,
            lane,
            scope,
            origin: JobOrigin::Scheduled {
                trigger: trigger.into(),
                slot,
            },
            max_attempts: 4,
            timeout_secs: 4 * 3_600,
        }
    }

    pub fn on_demand(mode: JobMode, lane: Lane, scope: Scope) -> Self {
        Self {
            mode,
            lane,
            scope,
            origin: JobOrigin::OnDemand { requested_by: None },
            max_attempts: 4,
            timeout_secs: 4 * 3_600,
        }
    }

    pub fn with_limits(mut self, max_attempts: u32, timeout_secs: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.timeout_secs = timeout_secs;
        self
    }

    /// `mode + schedule slot` for scheduled jobs; on-demand jobs have none.
    pub fn dedup_key(&self) -> Option<String> {
        match &self.origin {
            JobOrigin::Scheduled { slot, .. } => {
                Some(format!("{}:{}", self.mode.as_str(), slot.to_rfc3339()))
            }
            JobOrigin::OnDemand { .. } => None,
        }
    }
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Partial,
    /// Permanently failed: retries exhausted or the failure was not retryable.
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "partial" => Some(JobStatus::Partial),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Legal edges of the attempt state machine.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Pending)
                | (Running, Succeeded)
                | (Running, Partial)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

/// Record counters for one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub records_reconciled: u64,
    pub records_rejected: u64,
    pub records_skipped: u64,
}

/// What a worker reports when an attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(JobStats),
    Partial(JobStats),
    Cancelled(JobStats),
    Failed {
        stats: JobStats,
        error: String,
        retryable: bool,
    },
}

impl JobOutcome {
    /// Succeeded when nothing was rejected, partial otherwise.
    pub fn from_stats(stats: JobStats) -> Self {
        if stats.records_rejected == 0 {
            JobOutcome::Succeeded(stats)
        } else {
            JobOutcome::Partial(stats)
        }
    }

    pub fn stats(&self) -> JobStats {
        match self {
            JobOutcome::Succeeded(s) | JobOutcome::Partial(s) | JobOutcome::Cancelled(s) => *s,
            JobOutcome::Failed { stats, .. } => *stats,
        }
    }
}

// ── Job ──────────────────────────────────────────────────────────────

/// A queued job and its attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub spec: JobSpec,
    pub dedup_key: Option<String>,
    pub status: JobStatus,
    /// Attempts started so far.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Not claimable before this instant (retry backoff).
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    /// Counters of the most recent attempt.
    pub stats: JobStats,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dedup_key: spec.dedup_key(),
            spec,
            status: JobStatus::Pending,
            attempt: 0,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            cancel_requested: false,
            stats: JobStats::default(),
            last_error: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_transition(to) {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && !self.cancel_requested && self.available_at <= now
    }

    /// Pending → running. Starts a new attempt and its lease.
    pub fn start_attempt(&mut self, now: DateTime<Utc>, policy: &RetryPolicy) -> Result<(), QueueError> {
        self.transition(JobStatus::Running)?;
        self.attempt += 1;
        self.started_at = Some(now);
        self.finished_at = None;
        self.lease_expires_at = Some(now + policy.lease_for(self.spec.timeout_secs));
        self.stats = JobStats::default();
        Ok(())
    }

    /// Whether `attempt` is the one currently running.
    pub fn ensure_attempt(&self, attempt: u32) -> Result<(), QueueError> {
        if self.status == JobStatus::Running && self.attempt == attempt {
            return Ok(());
        }
        Err(QueueError::StaleAttempt {
            job_id: self.id,
            attempt,
            current: self.attempt,
            status: self.status,
        })
    }

    /// Running → terminal, or back to pending for a retryable failure with
    /// attempts left. A job whose cancellation was requested never ends as
    /// succeeded or partial.
    pub fn apply_outcome(
        &mut self,
        outcome: JobOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, QueueError> {
        if self.status != JobStatus::Running {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: match &outcome {
                    JobOutcome::Succeeded(_) => JobStatus::Succeeded,
                    JobOutcome::Partial(_) => JobStatus::Partial,
                    JobOutcome::Cancelled(_) => JobStatus::Cancelled,
                    JobOutcome::Failed { .. } => JobStatus::Failed,
                },
            });
        }
        self.stats = outcome.stats();
        self.lease_expires_at = None;
        match outcome {
            JobOutcome::Succeeded(_) | JobOutcome::Partial(_) | JobOutcome::Cancelled(_) if self.cancel_requested => {
                self.finish(JobStatus::Cancelled, now)?
            }
            JobOutcome::Succeeded(_) => self.finish(JobStatus::Succeeded, now)?,
            JobOutcome::Partial(_) => self.finish(JobStatus::Partial, now)?,
            JobOutcome::Cancelled(_) => self.finish(JobStatus::Cancelled, now)?,
            JobOutcome::Failed { error, retryable, .. } => {
                self.last_error = Some(error);
                self.fail_attempt(retryable, policy, now)?;
            }
        }
        Ok(self.status)
    }

    /// Treat an expired lease (crashed worker) as a retryable failure.
    pub fn expire_lease(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> Result<JobStatus, QueueError> {
        self.lease_expires_at = None;
        self.last_error = Some(format!("lease expired during attempt {}", self.attempt));
        self.fail_attempt(true, policy, now)?;
        Ok(self.status)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.map(|t| t <= now).unwrap_or(false)
    }

    /// Running → pending without consuming the attempt (graceful shutdown).
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Pending)?;
        self.attempt = self.attempt.saturating_sub(1);
        self.available_at = now;
        self.lease_expires_at = None;
        self.started_at = None;
        Ok(())
    }

    /// Flag for cancellation. Pending jobs are cancelled immediately; running
    /// jobs stop at the next record boundary. Terminal jobs are unaffected.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> Result<JobStatus, QueueError> {
        match self.status {
            JobStatus::Pending => {
                self.cancel_requested = true;
                self.finish(JobStatus::Cancelled, now)?;
            }
            JobStatus::Running => self.cancel_requested = true,
            _ => {}
        }
        Ok(self.status)
    }

    fn fail_attempt(&mut self, retryable: bool, policy: &RetryPolicy, now: DateTime<Utc>) -> Result<(), QueueError> {
        if retryable && !self.cancel_requested && self.attempt < self.spec.max_attempts {
            self.transition(JobStatus::Pending)?;
            self.available_at = now + policy.backoff_for(self.attempt);
            Ok(())
        } else {
            self.finish(JobStatus::Failed, now)
        }
    }

    fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(status)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Read-only view for the monitoring surface.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            mode: self.spec.mode,
            lane: self.spec.lane,
            status: self.status,
            scope: self.spec.scope.label(),
            origin: self.spec.origin.clone(),
            attempt: self.attempt,
            max_attempts: self.spec.max_attempts,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            records_reconciled: self.stats.records_reconciled,
            records_rejected: self.stats.records_rejected,
            records_skipped: self.stats.records_skipped,
            cancel_requested: self.cancel_requested,
            last_error: self.last_error.clone(),
        }
    }
}

/// Monitoring view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub mode: JobMode,
    pub lane: Lane,
    pub status: JobStatus,
    pub scope: String,
    pub origin: JobOrigin,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_reconciled: u64,
    pub records_rejected: u64,
    pub records_skipped: u64,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
}

/// Filter for listing jobs, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub lane: Option<Lane>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.lane.map(|l| l == job.spec.lane).unwrap_or(true)
            && self.status.map(|s| s == job.status).unwrap_or(true)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(100).min(1_000)
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(Uuid),
    /// A job with the same dedup key already exists.
    Duplicate(Uuid),
}

impl Enqueued {
    pub fn job_id(&self) -> Uuid {
        match self {
            Enqueued::Created(id) | Enqueued::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Enqueued::Duplicate(_))
    }
}

/// Pending/running counts for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneDepth {
    pub pending: u64,
    pub running: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(60), Duration::from_secs(5))
    }

    fn full_job(max_attempts: u32) -> Job {
        let spec = JobSpec::on_demand(JobMode::Full, Lane::Harvest, Scope::all())
            .with_limits(max_attempts, 30);
        Job::new(spec, Utc::now())
    }

    #[test]
    fn dedup_key_combines_mode_and_slot() {
        let slot = DateTime::parse_from_rfc3339("2026-01-04T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let spec = JobSpec::scheduled("weekly-full", JobMode::Full, Lane::Harvest, Scope::all(), slot);
        assert_eq!(spec.dedup_key().as_deref(), Some("full:2026-01-04T09:00:00+00:00"));
        // The trigger name plays no part.
        let renamed = JobSpec::scheduled("sunday-full", JobMode::Full, Lane::Harvest, Scope::all(), slot);
        assert_eq!(renamed.dedup_key(), spec.dedup_key());
        let adhoc = JobSpec::on_demand(JobMode::Full, Lane::Harvest, Scope::all());
        assert_eq!(adhoc.dedup_key(), None);
    }

    #[test]
    fn successful_attempt_is_terminal() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt, 1);
        let status = job
            .apply_outcome(JobOutcome::from_stats(JobStats { records_reconciled: 5, ..Default::default() }), &policy(), now)
            .unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert!(job.finished_at.is_some());
        assert_eq!(job.stats.records_reconciled, 5);
    }

    #[test]
    fn rejects_make_outcome_partial() {
        let stats = JobStats { records_reconciled: 9, records_rejected: 1, records_skipped: 0 };
        assert_eq!(JobOutcome::from_stats(stats), JobOutcome::Partial(stats));
    }

    #[test]
    fn retryable_failure_returns_to_pending_with_backoff() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        let status = job
            .apply_outcome(
                JobOutcome::Failed { stats: JobStats::default(), error: "timeout".into(), retryable: true },
                &policy(),
                now,
            )
            .unwrap();
        assert_eq!(status, JobStatus::Pending);
        assert_eq!(job.available_at, now + chrono::Duration::seconds(10));
        assert!(!job.is_claimable(now));
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn exhausted_attempts_fail_permanently() {
        let mut job = full_job(2);
        let now = Utc::now();
        for _ in 0..2 {
            job.available_at = now;
            job.start_attempt(now, &policy()).unwrap();
            job.apply_outcome(
                JobOutcome::Failed { stats: JobStats::default(), error: "boom".into(), retryable: true },
                &policy(),
                now,
            )
            .unwrap();
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt, 2);
    }

    #[test]
    fn non_retryable_failure_is_final_immediately() {
        let mut job = full_job(5);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        job.apply_outcome(
            JobOutcome::Failed { stats: JobStats::default(), error: "bad scope".into(), retryable: false },
            &policy(),
            now,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let mut job = full_job(1);
        let err = job
            .apply_outcome(JobOutcome::Succeeded(JobStats::default()), &policy(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[test]
    fn expired_lease_consumes_an_attempt() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        let later = now + chrono::Duration::seconds(36);
        assert!(job.lease_expired(later));
        assert_eq!(job.expire_lease(&policy(), later).unwrap(), JobStatus::Pending);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn release_does_not_consume_an_attempt() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        job.release(now).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);
        assert!(job.is_claimable(now));
    }

    #[test]
    fn cancel_pending_is_immediate_and_running_is_deferred() {
        let now = Utc::now();
        let mut pending = full_job(1);
        assert_eq!(pending.request_cancel(now).unwrap(), JobStatus::Cancelled);

        let mut running = full_job(1);
        running.start_attempt(now, &policy()).unwrap();
        assert_eq!(running.request_cancel(now).unwrap(), JobStatus::Running);
        assert!(running.cancel_requested);
    }

    #[test]
    fn cancel_requested_success_ends_cancelled() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        job.request_cancel(now).unwrap();
        let stats = JobStats { records_reconciled: 4, ..Default::default() };
        let status = job.apply_outcome(JobOutcome::Succeeded(stats), &policy(), now).unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(job.stats, stats);
    }

    #[test]
    fn only_the_running_attempt_may_report() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        assert!(job.ensure_attempt(1).is_ok());

        job.expire_lease(&policy(), now).unwrap();
        job.start_attempt(now, &policy()).unwrap();
        let err = job.ensure_attempt(1).unwrap_err();
        assert!(matches!(err, QueueError::StaleAttempt { attempt: 1, current: 2, .. }));
        assert!(job.ensure_attempt(2).is_ok());
    }

    #[test]
    fn cancel_requested_failure_is_not_retried() {
        let mut job = full_job(3);
        let now = Utc::now();
        job.start_attempt(now, &policy()).unwrap();
        job.request_cancel(now).unwrap();
        job.apply_outcome(
            JobOutcome::Failed { stats: JobStats::default(), error: "x".into(), retryable: true },
            &policy(),
            now,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}

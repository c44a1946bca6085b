//! The job queue trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{Enqueued, Job, JobFilter, JobOutcome, JobSnapshot, JobSpec, JobStatus, Lane, LaneDepth};

/// Durable hand-off between producers (scheduler, on-demand requests) and
/// workers.
///
/// Delivery is at-least-once: a job whose worker dies is handed out again
/// once its lease expires, so everything downstream must tolerate
/// redelivery. Jobs with a dedup key are created at most once per key.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. A scheduled spec whose dedup key already exists
    /// returns [`Enqueued::Duplicate`] with the existing job's id.
    async fn enqueue(&self, spec: JobSpec) -> Result<Enqueued, QueueError>;

    /// Claim the next available job on a lane, starting a new attempt.
    ///
    /// Jobs whose lease expired are returned to pending (or failed, if out
    /// of attempts) before the claim is made. Returns `None` when nothing is
    /// claimable.
    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError>;

    /// Report the end of `attempt`. Returns the resulting status.
    ///
    /// Fails with [`QueueError::StaleAttempt`] when `attempt` is no longer
    /// the running one, e.g. after its lease expired and the job was
    /// reclaimed. The report is then discarded.
    async fn complete(&self, job_id: Uuid, attempt: u32, outcome: JobOutcome) -> Result<JobStatus, QueueError>;

    /// Hand a running job back without consuming `attempt`.
    async fn release(&self, job_id: Uuid, attempt: u32) -> Result<(), QueueError>;

    /// Mark a job for cancellation. Pending jobs are cancelled at once.
    async fn request_cancel(&self, job_id: Uuid) -> Result<JobStatus, QueueError>;

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, QueueError>;

    /// Newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobSnapshot>, QueueError>;

    async fn depth(&self, lane: Lane) -> Result<LaneDepth, QueueError>;
}

//! Queue error types.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// The reporting worker no longer owns the job: its lease expired and
    /// the job was reclaimed or finished.
    #[error("job {job_id}: attempt {attempt} is stale (current attempt {current}, status {status})")]
    StaleAttempt {
        job_id: Uuid,
        attempt: u32,
        current: u32,
        status: JobStatus,
    },

    #[error("corrupt job row {job_id}: {message}")]
    Corrupt { job_id: Uuid, message: String },
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Backend(e.to_string())
    }
}

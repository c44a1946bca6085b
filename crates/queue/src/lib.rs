//! Durable job queue with dedup, leases and retry backoff.

pub mod error;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod retry;

pub use error::QueueError;
pub use job::{
    Enqueued, Job, JobFilter, JobOrigin, JobOutcome, JobSnapshot, JobSpec, JobStats, JobStatus, Lane,
    LaneDepth,
};
pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;
pub use queue::JobQueue;
pub use retry::RetryPolicy;

//! Scheduler error types.

use renec_core::JobMode;
use renec_queue::{Lane, QueueError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("trigger '{trigger}': invalid cron '{expr}': {message}")]
    InvalidCron {
        trigger: String,
        expr: String,
        message: String,
    },

    #[error("invalid timezone offset '{0}' (expected e.g. -06:00)")]
    InvalidTimezone(String),

    #[error("unknown drift policy '{0}' (expected backfill or skip)")]
    InvalidDriftPolicy(String),

    #[error("duplicate trigger name '{0}'")]
    DuplicateTrigger(String),

    #[error("trigger '{trigger}': mode {mode} cannot run on the {lane} lane")]
    LaneMismatch {
        trigger: String,
        mode: JobMode,
        lane: Lane,
    },

    #[error("schedule rules {path}: {message}")]
    Rules { path: String, message: String },

    #[error("schedule state {path}: {message}")]
    State { path: String, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

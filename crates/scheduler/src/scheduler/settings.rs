use std::time::Duration;

use chrono::FixedOffset;

use renec_core::config::{RetryConfig, ScheduleConfig};

use crate::drift::DriftPolicy;
use crate::error::ScheduleError;
use crate::rules::ScheduleFile;
use crate::slots::parse_timezone;

/// Resolved scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub timezone: FixedOffset,
    pub drift_policy: DriftPolicy,
    /// Slots older than `now - misfire_grace` count as missed.
    pub misfire_grace: chrono::Duration,
    pub tick_interval: Duration,
    /// Attempt cap and per-attempt timeout stamped on every enqueued job.
    pub max_attempts: u32,
    pub job_timeout_secs: u64,
}

impl SchedulerSettings {
    pub fn new(timezone: FixedOffset) -> Self {
        Self {
            timezone,
            drift_policy: DriftPolicy::Backfill,
            misfire_grace: chrono::Duration::minutes(5),
            tick_interval: Duration::from_secs(30),
            max_attempts: 4,
            job_timeout_secs: 4 * 3_600,
        }
    }

    /// Environment settings, with timezone and drift policy overridden by
    /// the schedule file when it sets them.
    pub fn from_config(
        schedule: &ScheduleConfig,
        retry: &RetryConfig,
        file: &ScheduleFile,
    ) -> Result<Self, ScheduleError> {
        let timezone = parse_timezone(file.timezone.as_deref().unwrap_or(&schedule.timezone))?;
        let drift_policy = DriftPolicy::parse(file.drift_policy.as_deref().unwrap_or(&schedule.drift_policy))?;
        Ok(Self {
            timezone,
            drift_policy,
            misfire_grace: chrono::Duration::seconds(schedule.misfire_grace_secs.min(i64::MAX as u64) as i64),
            tick_interval: Duration::from_secs(schedule.tick_interval_secs.max(1)),
            max_attempts: retry.max_attempts.max(1),
            job_timeout_secs: retry.job_timeout_secs,
        })
    }

    pub fn with_drift_policy(mut self, policy: DriftPolicy) -> Self {
        self.drift_policy = policy;
        self
    }
}

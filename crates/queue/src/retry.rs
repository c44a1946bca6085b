//! Exponential backoff and claim leases.

use std::time::Duration;

use renec_core::config::RetryConfig;

/// Backoff and lease timing shared by every queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Added to a job's timeout to get its claim lease.
    pub lease_grace: Duration,
}

impl RetryPolicy {
    pub fn new(base_backoff: Duration, max_backoff: Duration, lease_grace: Duration) -> Self {
        Self {
            base_backoff,
            max_backoff,
            lease_grace,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_backoff_secs),
            Duration::from_secs(config.max_backoff_secs),
            Duration::from_secs(config.lease_grace_secs),
        )
    }

    /// Zero backoff. Retried jobs are claimable immediately.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::from_secs(5))
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> chrono::Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
    }

    pub fn lease_for(&self, timeout_secs: u64) -> chrono::Duration {
        let lease = Duration::from_secs(timeout_secs).saturating_add(self.lease_grace);
        chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(3_600), Duration::from_secs(300))
    }
}

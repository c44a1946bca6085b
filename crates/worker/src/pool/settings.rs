use std::time::Duration;

use renec_core::config::WorkerConfig;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub harvest_workers: usize,
    pub monitoring_workers: usize,
    /// Idle wait when a lane has nothing claimable.
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            harvest_workers: config.harvest_workers as usize,
            monitoring_workers: config.monitoring_workers as usize,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            ..Self::default()
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            harvest_workers: 2,
            monitoring_workers: 1,
            poll_interval: Duration::from_secs(1),
        }
    }
}

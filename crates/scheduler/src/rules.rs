//! Trigger rules and the TOML schedule file.
//!
//! ```toml
//! timezone = "-06:00"
//! drift_policy = "backfill"
//!
//! [[trigger]]
//! name = "daily-probe"
//! cron = "0 2 * * *"
//! mode = "probe"
//!
//! [[trigger]]
//! name = "weekly-full-standards"
//! cron = "0 3 * * SUN"
//! mode = "full"
//! scope = { kinds = ["standard"] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use renec_core::{JobMode, Scope};
use renec_queue::Lane;

use crate::error::ScheduleError;

/// One cron trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub name: String,
    /// 5-field (`min hour dom mon dow`) or 6-field cron expression.
    pub cron: String,
    pub mode: JobMode,
    /// Defaults to `monitoring` for health checks, `harvest` otherwise.
    #[serde(default)]
    pub lane: Option<Lane>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl TriggerRule {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, mode: JobMode) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            mode,
            lane: None,
            scope: Scope::all(),
            enabled: true,
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane.unwrap_or_else(|| default_lane(self.mode))
    }
}

pub fn default_lane(mode: JobMode) -> Lane {
    match mode {
        JobMode::HealthCheck => Lane::Monitoring,
        _ => Lane::Harvest,
    }
}

/// Daily probe 02:00, daily freshness check 06:00, weekly full harvest
/// Sunday 03:00, health check every 15 minutes.
pub fn default_rules() -> Vec<TriggerRule> {
    vec![
        TriggerRule::new("daily-probe", "0 2 * * *", JobMode::Probe),
        TriggerRule::new("daily-freshness", "0 6 * * *", JobMode::FreshnessCheck),
        // The cron crate numbers weekdays 1-7 from Sunday; names avoid the ambiguity.
        TriggerRule::new("weekly-full", "0 3 * * SUN", JobMode::Full),
        TriggerRule::new("health-check", "*/15 * * * *", JobMode::HealthCheck),
    ]
}

/// Contents of a schedule file. Timezone and drift policy override the
/// environment when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub drift_policy: Option<String>,
    #[serde(default, rename = "trigger")]
    pub triggers: Vec<TriggerRule>,
}

impl Default for ScheduleFile {
    fn default() -> Self {
        Self {
            timezone: None,
            drift_policy: None,
            triggers: default_rules(),
        }
    }
}

impl ScheduleFile {
    pub fn parse(path_label: &str, text: &str) -> Result<Self, ScheduleError> {
        toml::from_str(text).map_err(|e| ScheduleError::Rules {
            path: path_label.to_string(),
            message: e.to_string(),
        })
    }
}

/// Load the schedule file, or the built-in defaults when no path is set.
pub fn load_schedule_file(path: Option<&Path>) -> Result<ScheduleFile, ScheduleError> {
    let Some(path) = path else {
        info!("no schedule file configured, using default triggers");
        return Ok(ScheduleFile::default());
    };

    let label = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| ScheduleError::Rules {
        path: label.clone(),
        message: e.to_string(),
    })?;
    let file = ScheduleFile::parse(&label, &text)?;
    info!(path = %label, triggers = file.triggers.len(), "schedule file loaded");
    Ok(file)
}

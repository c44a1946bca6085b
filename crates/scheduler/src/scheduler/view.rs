use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use uuid::Uuid;

use renec_core::JobMode;
use renec_queue::Lane;

use crate::drift::DriftRecord;

/// A slot that produced an enqueue call during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredSlot {
    pub trigger: String,
    pub slot: DateTime<Utc>,
    pub job_id: Uuid,
    /// The queue already held a job for this slot.
    pub duplicate: bool,
    pub backfill: bool,
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub fired: Vec<FiredSlot>,
    pub drift: Vec<DriftRecord>,
    /// Triggers whose enqueue or cursor write failed; retried next tick.
    pub failed_triggers: Vec<String>,
}

/// Monitoring view of one trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerView {
    pub name: String,
    pub cron: String,
    pub mode: JobMode,
    pub lane: Lane,
    pub scope: String,
    pub enabled: bool,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<FixedOffset>>,
}

//! Missed-slot detection records.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use renec_core::JobMode;

use crate::error::ScheduleError;

/// What to do with slots missed while the scheduler was not running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Enqueue once for the newest missed slot.
    #[default]
    Backfill,
    /// Record the drift and wait for the next slot.
    Skip,
}

impl DriftPolicy {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backfill" => Ok(DriftPolicy::Backfill),
            "skip" => Ok(DriftPolicy::Skip),
            other => Err(ScheduleError::InvalidDriftPolicy(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftPolicy::Backfill => "backfill",
            DriftPolicy::Skip => "skip",
        }
    }
}

/// One `ScheduleDriftDetected` occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub trigger: String,
    pub mode: JobMode,
    pub missed_slots: u32,
    pub first_missed: DateTime<Utc>,
    pub last_missed: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub policy: DriftPolicy,
    /// Job enqueued for the newest missed slot, if the policy backfilled.
    pub backfilled_job: Option<Uuid>,
}

const DEFAULT_CAPACITY: usize = 200;

/// Bounded in-memory history of drift records, oldest evicted first.
#[derive(Debug)]
pub struct DriftLog {
    records: Mutex<VecDeque<DriftRecord>>,
    capacity: usize,
}

impl DriftLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: DriftRecord) {
        // Append-only history: a poisoned lock still holds valid records.
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<DriftRecord> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DriftLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

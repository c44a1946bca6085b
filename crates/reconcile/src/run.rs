//! Per-run context and the full-run edge ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use renec_core::{EntityKind, EntityRef, JobMode, Scope};

/// Edges asserted during a full run, plus the entities whose assertions are
/// unknown for this run (rejected records, pages without a list).
#[derive(Debug, Default)]
pub struct EdgeLedger {
    /// (standard_key, certifier_key) → newest assertion time.
    pub asserted: BTreeMap<(String, String), DateTime<Utc>>,
    pub rejected: BTreeSet<EntityRef>,
    pub unlisted: BTreeSet<EntityRef>,
}

impl EdgeLedger {
    pub fn assert_from(&mut self, entity: &EntityRef, others: &BTreeSet<String>, at: DateTime<Utc>) {
        for other in others {
            let pair = match entity.kind {
                EntityKind::Standard => (entity.key.clone(), other.clone()),
                EntityKind::Certifier => (other.clone(), entity.key.clone()),
                EntityKind::Center => continue,
            };
            let seen = self.asserted.entry(pair).or_insert(at);
            *seen = (*seen).max(at);
        }
    }

    /// Entities whose edges must not be retired by this run.
    pub fn exempt(&self) -> BTreeSet<EntityRef> {
        self.rejected.union(&self.unlisted).cloned().collect()
    }
}

/// What the engine needs to know about the job a record came from.
#[derive(Debug)]
pub struct RunContext {
    pub job_id: Option<Uuid>,
    pub mode: JobMode,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
    ledger: Option<Mutex<EdgeLedger>>,
}

impl RunContext {
    pub fn new(mode: JobMode, scope: Scope, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: None,
            mode,
            scope,
            started_at,
            ledger: mode.infers_absence().then(|| Mutex::new(EdgeLedger::default())),
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Run the closure against the ledger, if this run keeps one.
    pub fn with_ledger<T>(&self, f: impl FnOnce(&mut EdgeLedger) -> T) -> Option<T> {
        self.ledger.as_ref().map(|m| {
            let mut ledger = m.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut *ledger)
        })
    }

    pub fn keeps_ledger(&self) -> bool {
        self.ledger.is_some()
    }
}

/// Result of [`finish_full_run`](crate::ReconciliationEngine::finish_full_run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullRunSummary {
    pub edges_asserted: u64,
    pub edges_retired: u64,
    pub entities_marked_stale: u64,
    /// False when the scope had a key filter, so nothing was retired or
    /// marked stale.
    pub absence_inferred: bool,
}

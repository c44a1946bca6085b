//! Merges raw observations into durable entity state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use renec_core::{AttrValue, Entity, EntityRef, RawRecord};

use crate::error::{ReconcileError, RecordRejected};
use crate::locks::KeyLocks;
use crate::run::{FullRunSummary, RunContext};
use crate::schema::{check_required, validate};
use crate::store::EntityStore;

/// Why a record was skipped rather than reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Kind or key outside the job's scope.
    OutOfScope,
    /// The mode does not create entities and the key is unknown.
    UnknownKey,
}

/// Per-record result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    Updated {
        changed_fields: Vec<String>,
        validity_changed: bool,
    },
    /// Only timestamps moved.
    Unchanged,
    Skipped { reason: SkipReason },
}

impl RecordOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RecordOutcome::Skipped { .. })
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn EntityStore>,
    locks: KeyLocks,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub async fn reconcile(&self, record: &RawRecord, ctx: &RunContext) -> Result<RecordOutcome, ReconcileError> {
        self.reconcile_at(record, ctx, Utc::now()).await
    }

    /// Reconcile one record as observed at `now`.
    ///
    /// Rejections are returned as [`ReconcileError::Rejected`] and leave the
    /// store untouched. Only [`ReconcileError::Store`] should fail a job.
    pub async fn reconcile_at(
        &self,
        record: &RawRecord,
        ctx: &RunContext,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, ReconcileError> {
        let validated = match validate(record) {
            Ok(v) => v,
            Err(rejected) => return Err(self.reject(rejected, ctx)),
        };
        if !ctx.scope.admits(record) {
            return Ok(RecordOutcome::Skipped {
                reason: SkipReason::OutOfScope,
            });
        }

        let entity_ref = validated.entity.clone();
        let _guard = self.locks.lock(&entity_ref).await;
        let existing = self.store.get(&entity_ref).await?;

        let outcome = match existing {
            None if !ctx.mode.discovers_entities() => {
                debug!(entity = %entity_ref, mode = %ctx.mode, "unknown key skipped");
                return Ok(RecordOutcome::Skipped {
                    reason: SkipReason::UnknownKey,
                });
            }
            None => {
                if let Err(rejected) = check_required(&entity_ref, &validated.attributes) {
                    return Err(self.reject(rejected, ctx));
                }
                let entity = Entity {
                    kind: entity_ref.kind,
                    key: entity_ref.key.clone(),
                    attributes: validated.attributes.clone(),
                    vigente: validated.vigente.unwrap_or(true),
                    stale: false,
                    first_seen: now,
                    last_seen: now,
                };
                self.store.upsert(entity).await?;
                RecordOutcome::Created
            }
            Some(current) => {
                let mut merged = current.attributes.clone();
                for (field, value) in &validated.attributes {
                    merged.insert(field.clone(), value.clone());
                }
                if let Err(rejected) = check_required(&entity_ref, &merged) {
                    return Err(self.reject(rejected, ctx));
                }

                let changed_fields: Vec<String> = validated
                    .attributes
                    .iter()
                    .filter(|(field, value)| !same_value(current.attributes.get(*field), value))
                    .map(|(field, _)| field.clone())
                    .collect();
                let vigente = validated.vigente.unwrap_or(current.vigente);
                let validity_changed = vigente != current.vigente;
                if current.stale {
                    info!(entity = %entity_ref, "stale entity observed again");
                }

                let updated = Entity {
                    attributes: merged,
                    vigente,
                    stale: false,
                    last_seen: current.last_seen.max(now),
                    ..current
                };
                self.store.upsert(updated).await?;

                if changed_fields.is_empty() && !validity_changed {
                    RecordOutcome::Unchanged
                } else {
                    RecordOutcome::Updated {
                        changed_fields,
                        validity_changed,
                    }
                }
            }
        };

        if entity_ref.kind.bears_accreditations() {
            ctx.with_ledger(|ledger| match &validated.accreditations {
                Some(keys) => ledger.assert_from(&entity_ref, keys, now),
                None => {
                    ledger.unlisted.insert(entity_ref.clone());
                }
            });
        }

        debug!(entity = %entity_ref, outcome = ?outcome, "record reconciled");
        Ok(outcome)
    }

    fn reject(&self, rejected: RecordRejected, ctx: &RunContext) -> ReconcileError {
        warn!(job_id = ?ctx.job_id, error = %rejected, "record rejected");
        if let Some(entity) = rejected.entity() {
            ctx.with_ledger(|ledger| ledger.rejected.insert(entity.clone()));
        }
        ReconcileError::Rejected(rejected)
    }

    /// Note a record the extractor could not decode.
    ///
    /// The entity it was about, when known, keeps its edges and is not
    /// marked stale by this run.
    pub fn reject_undecodable(&self, entity: Option<&EntityRef>, message: &str, ctx: &RunContext) {
        let label = entity.map_or_else(|| "-".to_string(), ToString::to_string);
        warn!(job_id = ?ctx.job_id, entity = %label, error = message, "undecodable record rejected");
        if let Some(entity) = entity {
            ctx.with_ledger(|ledger| ledger.rejected.insert(entity.clone()));
        }
    }

    /// Apply a completed full run's edge assertions and absence inference.
    ///
    /// Call only after the extractor stream completed. Asserted edges are
    /// always upserted as current; retirement of unasserted edges and stale
    /// marking run only for an exhaustive scope. Entities with rejected or
    /// unlisted records are exempt from both.
    pub async fn finish_full_run(&self, ctx: &RunContext) -> Result<FullRunSummary, ReconcileError> {
        let Some((asserted, exempt)) = ctx.with_ledger(|l| (std::mem::take(&mut l.asserted), l.exempt())) else {
            return Ok(FullRunSummary::default());
        };

        let mut summary = FullRunSummary {
            edges_asserted: asserted.len() as u64,
            ..Default::default()
        };
        for ((standard_key, certifier_key), at) in &asserted {
            self.store.upsert_edge(standard_key, certifier_key, true, *at).await?;
        }

        if ctx.scope.is_exhaustive() {
            let kinds = ctx.scope.covered_kinds();
            if kinds.iter().any(|k| k.bears_accreditations()) {
                summary.edges_retired = self
                    .store
                    .retire_edges_not_asserted_since(ctx.started_at, &exempt)
                    .await?;
            }
            summary.entities_marked_stale = self
                .store
                .mark_unseen_stale(&kinds, ctx.started_at, &exempt)
                .await?;
            summary.absence_inferred = true;
        }

        info!(
            job_id = ?ctx.job_id,
            scope = %ctx.scope.label(),
            edges_asserted = summary.edges_asserted,
            edges_retired = summary.edges_retired,
            marked_stale = summary.entities_marked_stale,
            exempt = exempt.len(),
            "full run finalized"
        );
        Ok(summary)
    }
}

/// Absent and null are the same for diffing.
fn same_value(old: Option<&AttrValue>, new: &AttrValue) -> bool {
    match old {
        Some(old) => old == new,
        None => new.is_null(),
    }
}

#[cfg(test)]
mod tests;

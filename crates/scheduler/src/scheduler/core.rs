//! [`Scheduler`]: owns the compiled triggers and their persisted cursors.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use renec_core::{JobMode, Scope, Shutdown};
use renec_queue::{Enqueued, JobOrigin, JobQueue, JobSpec, Lane};

use crate::drift::{DriftLog, DriftPolicy, DriftRecord};
use crate::error::ScheduleError;
use crate::rules::{default_lane, TriggerRule};
use crate::slots::{next_fire, parse_cron, scan_slots};
use crate::state::{ScheduleState, ScheduleStateStore};

use super::settings::SchedulerSettings;
use super::view::{FiredSlot, TickReport, TriggerView};

struct CompiledTrigger {
    rule: TriggerRule,
    schedule: Schedule,
    lane: Lane,
}

pub struct Scheduler {
    triggers: Vec<CompiledTrigger>,
    settings: SchedulerSettings,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ScheduleStateStore>,
    cursors: Mutex<ScheduleState>,
    drift: DriftLog,
}

impl Scheduler {
    /// Compile and validate trigger rules.
    ///
    /// Rejects invalid cron expressions, duplicate names, and health checks
    /// routed to the harvest lane (or harvests to the monitoring lane).
    pub fn new(
        rules: Vec<TriggerRule>,
        settings: SchedulerSettings,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ScheduleStateStore>,
    ) -> Result<Self, ScheduleError> {
        let mut seen = HashSet::new();
        let mut triggers = Vec::with_capacity(rules.len());

        for rule in rules {
            if !seen.insert(rule.name.clone()) {
                return Err(ScheduleError::DuplicateTrigger(rule.name));
            }
            let lane = rule.lane();
            if lane != default_lane(rule.mode) {
                return Err(ScheduleError::LaneMismatch {
                    trigger: rule.name,
                    mode: rule.mode,
                    lane,
                });
            }
            let schedule = parse_cron(&rule.name, &rule.cron)?;
            triggers.push(CompiledTrigger { rule, schedule, lane });
        }

        Ok(Self {
            triggers,
            settings,
            queue,
            store,
            cursors: Mutex::new(ScheduleState::default()),
            drift: DriftLog::default(),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Read persisted cursors. Triggers never seen before start at `now`,
    /// so a fresh install does not replay history.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let mut state = self.store.load().await?;
        let mut fresh = 0usize;
        for trigger in &self.triggers {
            if !state.last_fired.contains_key(&trigger.rule.name) {
                state.last_fired.insert(trigger.rule.name.clone(), now);
                fresh += 1;
            }
        }
        if fresh > 0 {
            state.saved_at = Some(now);
            self.store.save(&state).await?;
        }
        info!(
            triggers = self.triggers.len(),
            fresh,
            timezone = %self.settings.timezone,
            drift_policy = self.settings.drift_policy.as_str(),
            "schedule restored"
        );
        *self.cursors.lock().await = state;
        Ok(())
    }

    /// Evaluate every enabled trigger against `now`.
    ///
    /// A trigger's cursor advances only after its enqueue calls returned and
    /// the new cursor was persisted; on failure it stays put and the same
    /// slots are retried next tick (the queue absorbs the duplicates).
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut cursors = self.cursors.lock().await;
        let mut report = TickReport::default();

        for trigger in self.triggers.iter().filter(|t| t.rule.enabled) {
            let name = &trigger.rule.name;
            let Some(cursor) = cursors.last_fired.get(name).copied() else {
                cursors.last_fired.insert(name.clone(), now);
                continue;
            };

            let scan = scan_slots(
                &trigger.schedule,
                &self.settings.timezone,
                cursor,
                now,
                self.settings.misfire_grace,
            );
            let Some(latest) = scan.latest() else {
                continue;
            };

            let mut slots: Vec<(DateTime<Utc>, bool)> = scan.on_time.iter().map(|s| (*s, false)).collect();
            let backfill = scan.missed > 0
                && scan.on_time.is_empty()
                && self.settings.drift_policy == DriftPolicy::Backfill;
            if let (true, Some(last_missed)) = (backfill, scan.last_missed) {
                slots.push((last_missed, true));
            }

            let mut fired = Vec::with_capacity(slots.len());
            let mut failed = false;
            for (slot, is_backfill) in slots {
                match self.enqueue_slot(trigger, slot).await {
                    Ok(enqueued) => fired.push(FiredSlot {
                        trigger: name.clone(),
                        slot,
                        job_id: enqueued.job_id(),
                        duplicate: enqueued.is_duplicate(),
                        backfill: is_backfill,
                    }),
                    Err(e) => {
                        error!(trigger = %name, slot = %slot, error = %e, "failed to enqueue scheduled job");
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                report.failed_triggers.push(name.clone());
                continue;
            }

            let previous = cursors.last_fired.insert(name.clone(), latest);
            cursors.saved_at = Some(now);
            if let Err(e) = self.store.save(&cursors).await {
                error!(trigger = %name, error = %e, "failed to persist schedule cursor");
                match previous {
                    Some(p) => cursors.last_fired.insert(name.clone(), p),
                    None => cursors.last_fired.remove(name),
                };
                report.failed_triggers.push(name.clone());
                continue;
            }

            if let (Some(first_missed), Some(last_missed)) = (scan.first_missed, scan.last_missed) {
                let record = DriftRecord {
                    trigger: name.clone(),
                    mode: trigger.rule.mode,
                    missed_slots: scan.missed,
                    first_missed,
                    last_missed,
                    detected_at: now,
                    policy: self.settings.drift_policy,
                    backfilled_job: fired.iter().find(|f| f.backfill).map(|f| f.job_id),
                };
                warn!(
                    trigger = %name,
                    missed = record.missed_slots,
                    first_missed = %first_missed,
                    last_missed = %last_missed,
                    policy = record.policy.as_str(),
                    backfilled = record.backfilled_job.is_some(),
                    "schedule drift detected"
                );
                self.drift.push(record.clone());
                report.drift.push(record);
            }

            for slot in &fired {
                info!(
                    trigger = %slot.trigger,
                    slot = %slot.slot,
                    job_id = %slot.job_id,
                    duplicate = slot.duplicate,
                    "trigger fired"
                );
            }
            report.fired.extend(fired);
        }

        report
    }

    async fn enqueue_slot(&self, trigger: &CompiledTrigger, slot: DateTime<Utc>) -> Result<Enqueued, ScheduleError> {
        let spec = JobSpec::scheduled(
            trigger.rule.name.clone(),
            trigger.rule.mode,
            trigger.lane,
            trigger.rule.scope.clone(),
            slot,
        )
        .with_limits(self.settings.max_attempts, self.settings.job_timeout_secs);
        Ok(self.queue.enqueue(spec).await?)
    }

    /// Ad-hoc enqueue outside the cron schedule. Never deduplicated.
    pub async fn request_harvest(
        &self,
        mode: JobMode,
        scope: Scope,
        requested_by: Option<String>,
    ) -> Result<Enqueued, ScheduleError> {
        let mut spec = JobSpec::on_demand(mode, default_lane(mode), scope)
            .with_limits(self.settings.max_attempts, self.settings.job_timeout_secs);
        spec.origin = JobOrigin::OnDemand { requested_by };
        let enqueued = self.queue.enqueue(spec).await?;
        info!(job_id = %enqueued.job_id(), mode = %mode, "on-demand harvest requested");
        Ok(enqueued)
    }

    /// Trigger table with cursors and next fire times.
    pub async fn triggers(&self, now: DateTime<Utc>) -> Vec<TriggerView> {
        let cursors = self.cursors.lock().await;
        self.triggers
            .iter()
            .map(|t| {
                let last_fired = cursors.last_fired.get(&t.rule.name).copied();
                let from = last_fired.map(|c| c.max(now)).unwrap_or(now);
                TriggerView {
                    name: t.rule.name.clone(),
                    cron: t.rule.cron.clone(),
                    mode: t.rule.mode,
                    lane: t.lane,
                    scope: t.rule.scope.label(),
                    enabled: t.rule.enabled,
                    last_fired,
                    next_fire: t
                        .rule
                        .enabled
                        .then(|| next_fire(&t.schedule, &self.settings.timezone, from))
                        .flatten(),
                }
            })
            .collect()
    }

    /// Recent drift records, newest first.
    pub fn drift_records(&self) -> Vec<DriftRecord> {
        self.drift.recent()
    }

    /// Tick until shutdown is signalled.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        info!(
            interval_secs = self.settings.tick_interval.as_secs(),
            "scheduler started"
        );
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    debug!(
                        fired = report.fired.len(),
                        drift = report.drift.len(),
                        failed = report.failed_triggers.len(),
                        "scheduler tick"
                    );
                }
            }
        }
        info!("scheduler stopped");
    }
}

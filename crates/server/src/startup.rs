//! Backend selection and component wiring.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::warn;

use renec_core::Config;
use renec_queue::{JobQueue, MemoryJobQueue, PgJobQueue, RetryPolicy};
use renec_reconcile::{EntityStore, MemoryStore, PgEntityStore, ReconciliationEngine};
use renec_scheduler::{
    load_schedule_file, FileScheduleState, MemoryScheduleState, ScheduleStateStore, Scheduler, SchedulerSettings,
};
use renec_worker::{extractor, JobLog, WorkerPool, WorkerSettings};

use crate::db;
use crate::state::AppState;

pub struct Backends {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn EntityStore>,
    pub label: &'static str,
}

/// PostgreSQL when configured, process memory otherwise (or when forced).
pub async fn init_backends(config: &Config, force_memory: bool) -> anyhow::Result<Backends> {
    let policy = RetryPolicy::from_config(&config.retry);
    if !force_memory {
        if let Some(pool) = db::init_pg_pool(&config.postgres).await? {
            return Ok(Backends {
                queue: Arc::new(PgJobQueue::new(pool.clone(), policy)),
                store: Arc::new(PgEntityStore::new(pool)),
                label: "postgres",
            });
        }
    }
    warn!("using in-memory queue and store; state is lost on restart");
    Ok(Backends {
        queue: Arc::new(MemoryJobQueue::new(policy)),
        store: Arc::new(MemoryStore::new()),
        label: "memory",
    })
}

/// Compile trigger rules against a cursor store. Cursors are not loaded
/// until [`Scheduler::restore`] runs.
pub fn build_scheduler(
    config: &Config,
    rules_override: Option<&std::path::Path>,
    queue: Arc<dyn JobQueue>,
    state: Arc<dyn ScheduleStateStore>,
) -> anyhow::Result<Scheduler> {
    let rules_path = rules_override.or(config.schedule.rules_path.as_deref());
    let file = load_schedule_file(rules_path).context("loading trigger rules")?;
    let settings = SchedulerSettings::from_config(&config.schedule, &config.retry, &file)?;
    Ok(Scheduler::new(file.triggers, settings, queue, state)?)
}

/// The scheduler the serve loop runs: file-backed cursors, restored.
pub async fn restored_scheduler(
    config: &Config,
    rules_override: Option<&std::path::Path>,
    queue: Arc<dyn JobQueue>,
) -> anyhow::Result<Arc<Scheduler>> {
    let state = Arc::new(FileScheduleState::new(&config.schedule.state_path));
    let scheduler = build_scheduler(config, rules_override, queue, state)?;
    scheduler.restore(Utc::now()).await.context("restoring schedule cursors")?;
    Ok(Arc::new(scheduler))
}

/// A scheduler over a read-only copy of the persisted cursors, for the
/// one-shot commands.
pub async fn detached_scheduler(
    config: &Config,
    rules_override: Option<&std::path::Path>,
    queue: Arc<dyn JobQueue>,
) -> anyhow::Result<Scheduler> {
    let cursors = FileScheduleState::new(&config.schedule.state_path)
        .load()
        .await
        .context("reading schedule cursors")?;
    let scheduler = build_scheduler(config, rules_override, queue, Arc::new(MemoryScheduleState::new(cursors)))?;
    scheduler.restore(Utc::now()).await?;
    Ok(scheduler)
}

pub fn build_worker_pool(config: &Config, backends: &Backends) -> anyhow::Result<Arc<WorkerPool>> {
    let extractor = extractor::from_config(&config.extractor, config.workers.stream_buffer as usize)?;
    let engine = Arc::new(ReconciliationEngine::new(backends.store.clone()));
    let pool = WorkerPool::new(
        backends.queue.clone(),
        engine,
        extractor,
        WorkerSettings::from_config(&config.workers),
    )
    .with_job_log(JobLog::new(config.server.data_dir.join("harvest")));
    Ok(Arc::new(pool))
}

pub fn app_state(config: &Config, backends: &Backends, scheduler: Arc<Scheduler>) -> Arc<AppState> {
    Arc::new(AppState {
        queue: backends.queue.clone(),
        store: backends.store.clone(),
        scheduler,
        backend: backends.label,
        started_at: Utc::now(),
        config: config.redacted_summary(),
    })
}

//! PostgreSQL queue backend over the `harvest_jobs` table.
//!
//! Every mutation loads the row `FOR UPDATE`, runs the same [`Job`] state
//! machine the in-memory backend uses, and writes the row back in the same
//! transaction. Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers
//! never receive the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use renec_core::JobMode;

use crate::error::QueueError;
use crate::job::{
    Enqueued, Job, JobFilter, JobOrigin, JobOutcome, JobSnapshot, JobSpec, JobStats, JobStatus, Lane,
    LaneDepth,
};
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;

const JOB_COLUMNS: &str = "id, lane, mode, scope, origin, dedup_key, status, attempt, max_attempts,
     timeout_secs, enqueued_at, available_at, started_at, finished_at, lease_expires_at,
     cancel_requested, records_reconciled, records_rejected, records_skipped, last_error";

// ── Row mapping ──────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    lane: String,
    mode: String,
    scope: serde_json::Value,
    origin: serde_json::Value,
    dedup_key: Option<String>,
    status: String,
    attempt: i32,
    max_attempts: i32,
    timeout_secs: i64,
    enqueued_at: DateTime<Utc>,
    available_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
    records_reconciled: i64,
    records_rejected: i64,
    records_skipped: i64,
    last_error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| QueueError::Corrupt { job_id: row.id, message };

        let lane = Lane::parse(&row.lane).ok_or_else(|| corrupt(format!("unknown lane '{}'", row.lane)))?;
        let mode: JobMode = row.mode.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status =
            JobStatus::parse(&row.status).ok_or_else(|| corrupt(format!("unknown status '{}'", row.status)))?;
        let scope = serde_json::from_value(row.scope.clone()).map_err(|e| corrupt(format!("scope: {e}")))?;
        let origin: JobOrigin =
            serde_json::from_value(row.origin.clone()).map_err(|e| corrupt(format!("origin: {e}")))?;

        Ok(Job {
            id: row.id,
            spec: JobSpec {
                mode,
                lane,
                scope,
                origin,
                max_attempts: row.max_attempts.max(1) as u32,
                timeout_secs: row.timeout_secs.max(0) as u64,
            },
            dedup_key: row.dedup_key,
            status,
            attempt: row.attempt.max(0) as u32,
            enqueued_at: row.enqueued_at,
            available_at: row.available_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            lease_expires_at: row.lease_expires_at,
            cancel_requested: row.cancel_requested,
            stats: JobStats {
                records_reconciled: row.records_reconciled.max(0) as u64,
                records_rejected: row.records_rejected.max(0) as u64,
                records_skipped: row.records_skipped.max(0) as u64,
            },
            last_error: row.last_error,
        })
    }
}

fn to_json<T: serde::Serialize>(job_id: Uuid, value: &T) -> Result<serde_json::Value, QueueError> {
    serde_json::to_value(value).map_err(|e| QueueError::Corrupt { job_id, message: e.to_string() })
}

// ── Store ────────────────────────────────────────────────────────────

pub struct PgJobQueue {
    pool: PgPool,
    policy: RetryPolicy,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    async fn load_for_update(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<Job, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM harvest_jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;
        Job::try_from(row)
    }

    /// Write back the mutable part of a job row.
    async fn save(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE harvest_jobs
             SET status = $2, attempt = $3, available_at = $4, started_at = $5,
                 finished_at = $6, lease_expires_at = $7, cancel_requested = $8,
                 records_reconciled = $9, records_rejected = $10, records_skipped = $11,
                 last_error = $12
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.attempt as i32)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.lease_expires_at)
        .bind(job.cancel_requested)
        .bind(job.stats.records_reconciled as i64)
        .bind(job.stats.records_rejected as i64)
        .bind(job.stats.records_skipped as i64)
        .bind(&job.last_error)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Load, mutate and persist one job inside a single transaction.
    async fn mutate<T, F>(&self, job_id: Uuid, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Job) -> Result<T, QueueError> + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await?;
        let mut job = Self::load_for_update(&mut tx, job_id).await?;
        let result = f(&mut job)?;
        Self::save(&mut tx, &job).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn reap_expired(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        lane: Lane,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM harvest_jobs
             WHERE lane = $1 AND status = 'running' AND lease_expires_at <= $2
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(lane.as_str())
            .bind(now)
            .fetch_all(&mut **tx)
            .await?;

        for row in rows {
            let mut job = Job::try_from(row)?;
            let status = job.expire_lease(&self.policy, now)?;
            warn!(job_id = %job.id, attempt = job.attempt, status = %status, "job lease expired");
            Self::save(tx, &job).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, spec: JobSpec) -> Result<Enqueued, QueueError> {
        let job = Job::new(spec, Utc::now());
        let scope = to_json(job.id, &job.spec.scope)?;
        let origin = to_json(job.id, &job.spec.origin)?;

        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO harvest_jobs (id, lane, mode, scope, origin, dedup_key, status, attempt,
                                       max_attempts, timeout_secs, enqueued_at, available_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $8, $9, $9)
             ON CONFLICT (dedup_key) DO NOTHING
             RETURNING id",
        )
        .bind(job.id)
        .bind(job.spec.lane.as_str())
        .bind(job.spec.mode.as_str())
        .bind(&scope)
        .bind(&origin)
        .bind(&job.dedup_key)
        .bind(job.spec.max_attempts as i32)
        .bind(job.spec.timeout_secs as i64)
        .bind(job.enqueued_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            info!(job_id = %id, mode = %job.spec.mode, lane = %job.spec.lane, "job enqueued");
            return Ok(Enqueued::Created(id));
        }

        let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM harvest_jobs WHERE dedup_key = $1")
            .bind(&job.dedup_key)
            .fetch_one(&self.pool)
            .await?;
        debug!(dedup_key = ?job.dedup_key, job_id = %existing, "duplicate enqueue absorbed");
        Ok(Enqueued::Duplicate(existing))
    }

    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        self.reap_expired(&mut tx, lane, now).await?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM harvest_jobs
             WHERE lane = $1 AND status = 'pending' AND NOT cancel_requested AND available_at <= $2
             ORDER BY available_at, enqueued_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(lane.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let mut job = Job::try_from(row)?;
        job.start_attempt(now, &self.policy)?;
        Self::save(&mut tx, &job).await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn complete(&self, job_id: Uuid, attempt: u32, outcome: JobOutcome) -> Result<JobStatus, QueueError> {
        let policy = self.policy;
        self.mutate(job_id, move |job| {
            job.ensure_attempt(attempt)?;
            job.apply_outcome(outcome, &policy, Utc::now())
        })
        .await
    }

    async fn release(&self, job_id: Uuid, attempt: u32) -> Result<(), QueueError> {
        self.mutate(job_id, move |job| {
            job.ensure_attempt(attempt)?;
            job.release(Utc::now())
        })
        .await
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<JobStatus, QueueError> {
        self.mutate(job_id, |job| job.request_cancel(Utc::now())).await
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool, QueueError> {
        sqlx::query_scalar::<_, bool>("SELECT cancel_requested FROM harvest_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM harvest_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Job::try_from(r).map(|j| j.snapshot())).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobSnapshot>, QueueError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM harvest_jobs
             WHERE ($1::text IS NULL OR lane = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY enqueued_at DESC
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(filter.lane.map(|l| l.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.effective_limit() as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| Job::try_from(r).map(|j| j.snapshot()))
            .collect()
    }

    async fn depth(&self, lane: Lane) -> Result<LaneDepth, QueueError> {
        let (pending, running) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*) FILTER (WHERE status = 'pending'),
                    COUNT(*) FILTER (WHERE status = 'running')
             FROM harvest_jobs
             WHERE lane = $1",
        )
        .bind(lane.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(LaneDepth {
            pending: pending.max(0) as u64,
            running: running.max(0) as u64,
        })
    }
}

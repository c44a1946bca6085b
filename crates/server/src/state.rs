use std::sync::Arc;

use chrono::{DateTime, Utc};

use renec_queue::JobQueue;
use renec_reconcile::EntityStore;
use renec_scheduler::Scheduler;

/// Shared by every handler. The API reads entity state and writes only to
/// the queue (on-demand enqueue, cancel).
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn EntityStore>,
    pub scheduler: Arc<Scheduler>,
    /// `postgres` or `memory`.
    pub backend: &'static str,
    pub started_at: DateTime<Utc>,
    /// Redacted effective configuration, reported by `/health`.
    pub config: serde_json::Value,
}

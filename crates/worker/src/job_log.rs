//! Append-only JSONL log of finished job attempts.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use renec_core::JobMode;
use renec_queue::{JobStats, JobStatus, Lane};

/// One line of `jobs.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: Uuid,
    pub mode: JobMode,
    pub lane: Lane,
    pub attempt: u32,
    /// Queue status after the attempt was reported.
    pub status: JobStatus,
    pub records_reconciled: u64,
    pub records_rejected: u64,
    pub records_skipped: u64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobLogEntry {
    pub fn stats(&self) -> JobStats {
        JobStats {
            records_reconciled: self.records_reconciled,
            records_rejected: self.records_rejected,
            records_skipped: self.records_skipped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    /// Log into `<dir>/jobs.jsonl`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("jobs.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: failures are logged, never propagated.
    pub fn append(&self, entry: &JobLogEntry) {
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(error = %e, "failed to create job log directory");
                return;
            }
        }

        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize job log entry");
                return;
            }
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match file {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!(error = %e, path = %self.path.display(), "failed to append job log");
                }
            }
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to open job log"),
        }
    }

    /// Every parseable entry, oldest first.
    pub fn read_all(&self) -> Vec<JobLogEntry> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

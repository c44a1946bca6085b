//! Persisted per-trigger cursors (last fired slot).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScheduleError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Trigger name → newest slot already handled.
    #[serde(default)]
    pub last_fired: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ScheduleStateStore: Send + Sync {
    /// Empty state when nothing was persisted yet.
    async fn load(&self) -> Result<ScheduleState, ScheduleError>;

    async fn save(&self, state: &ScheduleState) -> Result<(), ScheduleError>;
}

// ── File ─────────────────────────────────────────────────────────────

/// JSON file written via temp file + rename so a crash never leaves a
/// half-written cursor behind.
pub struct FileScheduleState {
    path: PathBuf,
}

impl FileScheduleState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, message: impl ToString) -> ScheduleError {
        ScheduleError::State {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ScheduleStateStore for FileScheduleState {
    async fn load(&self) -> Result<ScheduleState, ScheduleError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| self.err(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no schedule state yet");
                Ok(ScheduleState::default())
            }
            Err(e) => Err(self.err(e)),
        }
    }

    async fn save(&self, state: &ScheduleState) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.err(e))?;
        }
        let json = serde_json::to_vec_pretty(state).map_err(|e| self.err(e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| self.err(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.err(e))?;
        Ok(())
    }
}

// ── Memory ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryScheduleState {
    inner: Mutex<ScheduleState>,
}

impl MemoryScheduleState {
    pub fn new(initial: ScheduleState) -> Self {
        Self { inner: Mutex::new(initial) }
    }
}

#[async_trait]
impl ScheduleStateStore for MemoryScheduleState {
    async fn load(&self) -> Result<ScheduleState, ScheduleError> {
        Ok(self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn save(&self, state: &ScheduleState) -> Result<(), ScheduleError> {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner()) = state.clone();
        Ok(())
    }
}

//! Extraction and worker errors.

use std::path::PathBuf;

use renec_core::EntityRef;
use renec_queue::QueueError;
use renec_reconcile::StoreError;
use thiserror::Error;

/// The extractor could not produce (more) records, or produced one it could
/// not decode.
///
/// Everything except [`ExtractionError::Malformed`] ends the stream and is
/// retryable at the job level.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Valid JSON that is not a record (unknown kind, wrong field types).
    /// Reported for that record only; the stream goes on.
    #[error("{path}:{line}: malformed record: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        /// Kind and key, when they could still be read.
        entity: Option<EntityRef>,
        message: String,
    },

    #[error("http error: {0}")]
    Http(String),

    #[error("extractor timed out after {0}s")]
    Timeout(u64),
}

impl ExtractionError {
    pub fn is_per_record(&self) -> bool {
        matches!(self, ExtractionError::Malformed { .. })
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        ExtractionError::Http(e.to_string())
    }
}

/// Failures of the worker loop itself, outside any one job attempt.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid extractor config: {0}")]
    Config(String),
}

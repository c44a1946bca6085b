//! Store, validation and reconciliation errors.

use renec_core::{EntityKind, EntityRef};
use thiserror::Error;

/// Backend failures. Always retryable at the job level.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row for {entity}: {message}")]
    Corrupt { entity: String, message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// A malformed record. Reported per record; never aborts the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejected {
    #[error("{kind} record without a natural key ({field})")]
    MissingKey { kind: EntityKind, field: &'static str },

    #[error("{entity}: field '{field}': {message}")]
    InvalidField {
        entity: EntityRef,
        field: String,
        message: String,
    },

    #[error("{entity}: required field '{field}' is missing")]
    MissingRequired { entity: EntityRef, field: &'static str },
}

impl RecordRejected {
    /// The entity the record was about, when it carried a key.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            RecordRejected::MissingKey { .. } => None,
            RecordRejected::InvalidField { entity, .. } | RecordRejected::MissingRequired { entity, .. } => {
                Some(entity)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("record rejected: {0}")]
    Rejected(#[from] RecordRejected),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Store failures fail the job attempt; rejections only count.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, ReconcileError::Store(_))
    }
}

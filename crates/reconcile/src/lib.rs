//! Entity reconciliation: validation, merge rules, per-key locking and the
//! stores the engine writes through.

pub mod engine;
pub mod error;
pub mod locks;
pub mod memory;
pub mod postgres;
pub mod run;
pub mod schema;
pub mod store;

pub use engine::{ReconciliationEngine, RecordOutcome, SkipReason};
pub use error::{ReconcileError, RecordRejected, StoreError};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use postgres::PgEntityStore;
pub use run::{EdgeLedger, FullRunSummary, RunContext};
pub use schema::{schema_for, validate, FieldSpec, FieldType, ValidatedRecord};
pub use store::EntityStore;

//! Harvest executors: the extractor contract, its adapters and the lane
//! worker pool.

pub mod error;
pub mod extractor;
pub mod job_log;
pub mod pool;

pub use error::{ExtractionError, WorkerError};
pub use extractor::{Extractor, HttpExtractor, JsonlExtractor, RecordStream};
pub use job_log::{JobLog, JobLogEntry};
pub use pool::{JobReport, WorkerPool, WorkerSettings};

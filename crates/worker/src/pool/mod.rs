//! Lane workers: claim one job, stream its records through the engine,
//! report the outcome.
//!
//! Split into:
//! - `core`: the pool, per-lane loops and attempt reporting
//! - `execution`: harvest and health-check attempts
//! - `settings`: pool sizing and polling

mod core;
mod execution;
mod settings;

pub use self::core::{JobReport, WorkerPool};
pub use self::settings::WorkerSettings;

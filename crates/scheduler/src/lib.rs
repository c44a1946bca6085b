//! Timezone-anchored cron triggers that feed the job queue.
//!
//! Each trigger remembers the last slot it fired for; the cursor is
//! persisted so a restart never fires the same slot twice. Slots that were
//! missed while the process was down are reported as drift and handled per
//! the configured [`DriftPolicy`].

pub mod slots;
pub mod drift;
pub mod error;
pub mod rules;
pub mod scheduler;
pub mod state;

pub use drift::{DriftLog, DriftPolicy, DriftRecord};
pub use error::ScheduleError;
pub use rules::{default_rules, load_schedule_file, ScheduleFile, TriggerRule};
pub use scheduler::{FiredSlot, Scheduler, SchedulerSettings, TickReport, TriggerView};
pub use state::{FileScheduleState, MemoryScheduleState, ScheduleState, ScheduleStateStore};

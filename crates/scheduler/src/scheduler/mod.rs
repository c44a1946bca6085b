//! The trigger loop: evaluates cron slots, enqueues jobs, persists cursors.

mod core;
mod settings;
mod view;


pub use self::core::Scheduler;
pub use self::settings::SchedulerSettings;
pub use self::view::{FiredSlot, TickReport, TriggerView};

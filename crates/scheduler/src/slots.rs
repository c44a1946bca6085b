//! Cron parsing, the fixed schedule timezone, and slot enumeration.

use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use cron::Schedule;

use crate::error::ScheduleError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`;
/// schedule files use the standard 5-field form.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse_cron(trigger: &str, expr: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(&normalize_cron(expr)).map_err(|e| ScheduleError::InvalidCron {
        trigger: trigger.to_string(),
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// Parse a fixed UTC offset: `-06:00`, `+0530`, `-6`, `UTC` or `Z`.
pub fn parse_timezone(s: &str) -> Result<FixedOffset, ScheduleError> {
    let invalid = || ScheduleError::InvalidTimezone(s.to_string());
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None if !rest.is_empty() && rest.len() <= 2 => (rest, "0"),
        None => return Err(invalid()),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3_600 + minutes * 60)).ok_or_else(invalid)
}

/// Slots in `(after, now]`, split by whether they are still within the
/// misfire grace window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotScan {
    /// Slots no older than `now - grace`, oldest first.
    pub on_time: Vec<DateTime<Utc>>,
    pub missed: u32,
    pub first_missed: Option<DateTime<Utc>>,
    pub last_missed: Option<DateTime<Utc>>,
}

impl SlotScan {
    pub fn is_empty(&self) -> bool {
        self.on_time.is_empty() && self.missed == 0
    }

    /// Newest slot seen, which becomes the trigger's new cursor.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.on_time.last().copied().or(self.last_missed)
    }
}

/// Enumerate cron slots in `(after, now]`, evaluated in `tz`.
pub fn scan_slots(
    schedule: &Schedule,
    tz: &FixedOffset,
    after: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: Duration,
) -> SlotScan {
    let horizon = now - grace;
    let mut scan = SlotScan::default();

    for slot in schedule.after(&after.with_timezone(tz)) {
        let slot = slot.with_timezone(&Utc);
        if slot > now {
            break;
        }
        if slot < horizon {
            scan.missed += 1;
            scan.first_missed.get_or_insert(slot);
            scan.last_missed = Some(slot);
        } else {
            scan.on_time.push(slot);
        }
    }
    scan
}

/// Next fire time strictly after `after`, in the schedule timezone.
pub fn next_fire(schedule: &Schedule, tz: &FixedOffset, after: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
    schedule.after(&after.with_timezone(tz)).next()
}

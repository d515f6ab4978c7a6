//! Cooldown and due-date arithmetic.
//!
//! Distances are measured on calendar boundaries (day-of-year, ISO week,
//! month-of-year, year), not elapsed-duration blocks: a task completed at
//! 23:59 is one day old at 00:01. For day/week/month units, crossing a year
//! boundary counts as past due regardless of magnitude so that the
//! unit-of-year distance cannot wrap around (day 364 -> day 1 would
//! otherwise read as negative).

use chrono::{DateTime, Datelike, Days, Months, Utc};

use crate::types::CooldownUnit;

fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Whether a task last completed at `last_completed_at` (epoch ms) is past
/// its cooldown as of `now`.
///
/// A magnitude of 0 means the task is due again immediately.
pub fn due_status(
    now: DateTime<Utc>,
    last_completed_at: i64,
    cooldown: u32,
    unit: CooldownUnit,
) -> bool {
    let Some(last) = from_ms(last_completed_at) else {
        return false;
    };
    let magnitude = cooldown as i64;
    let crossed_year = now.year() != last.year();

    match unit {
        CooldownUnit::Never => false,
        CooldownUnit::Day => {
            crossed_year || (now.ordinal() as i64 - last.ordinal() as i64) >= magnitude
        }
        CooldownUnit::Week => {
            crossed_year
                || (now.iso_week().week() as i64 - last.iso_week().week() as i64) >= magnitude
        }
        CooldownUnit::Month => {
            crossed_year || (now.month() as i64 - last.month() as i64) >= magnitude
        }
        CooldownUnit::Year => (now.year() as i64 - last.year() as i64) >= magnitude,
    }
}

/// Whole-unit distance between `now` and the due date (last completion plus
/// the cooldown), absolute, plus one. Never returns less than 1: at the due
/// moment the task reads as "due in 1".
///
/// `Never` has no due date; callers are expected to gate on the unit first.
pub fn time_remaining(
    now: DateTime<Utc>,
    last_completed_at: i64,
    cooldown: u32,
    unit: CooldownUnit,
) -> i64 {
    debug_assert!(unit != CooldownUnit::Never, "no due date for unit=never");
    let Some(last) = from_ms(last_completed_at) else {
        return 1;
    };
    let Some(due) = due_date(last, cooldown, unit) else {
        return 1;
    };
    unit_distance(now, due, unit).abs() + 1
}

/// The moment a task becomes due again: last completion plus the cooldown.
fn due_date(last: DateTime<Utc>, cooldown: u32, unit: CooldownUnit) -> Option<DateTime<Utc>> {
    match unit {
        CooldownUnit::Day => last.checked_add_days(Days::new(cooldown as u64)),
        CooldownUnit::Week => last.checked_add_days(Days::new(cooldown as u64 * 7)),
        CooldownUnit::Month => last.checked_add_months(Months::new(cooldown)),
        CooldownUnit::Year => cooldown
            .checked_mul(12)
            .and_then(|months| last.checked_add_months(Months::new(months))),
        CooldownUnit::Never => None,
    }
}

/// Signed whole-unit count from `from` to `to`, truncated toward zero.
fn unit_distance(from: DateTime<Utc>, to: DateTime<Utc>, unit: CooldownUnit) -> i64 {
    match unit {
        CooldownUnit::Day => (to - from).num_days(),
        CooldownUnit::Week => (to - from).num_weeks(),
        CooldownUnit::Month => whole_months(from, to),
        CooldownUnit::Year => whole_months(from, to) / 12,
        CooldownUnit::Never => 0,
    }
}

/// Whole calendar months from `from` to `to`, truncated toward zero.
fn whole_months(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let mut span = (to.year() as i64 - from.year() as i64) * 12
        + (to.month() as i64 - from.month() as i64);
    if span > 0 && to.day() < from.day() {
        span -= 1;
    }
    if span < 0 && to.day() > from.day() {
        span += 1;
    }
    span
}

use std::sync::RwLock;

use chrono::{DateTime, Datelike, FixedOffset, Local, TimeDelta, Timelike};

pub const SECS_PER_DAY: i64 = 86_400;

/// Longest trial a control command may set.
pub const MAX_TRIAL_DAYS: i64 = 3650;
const MS_PER_DAY: i64 = SECS_PER_DAY * 1000;

/// Source of wall-clock time for lifecycle arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local wall clock; weeks end on the local Sunday.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: RwLock<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now: RwLock::new(now) }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Time left until the coming Sunday 23:59:59.999 in `now`'s offset.
/// On a Sunday that is the end of the same day.
pub fn until_end_of_week(now: DateTime<FixedOffset>) -> TimeDelta {
    let days_ahead = (7 - i64::from(now.weekday().num_days_from_sunday())) % 7;
    // Leap-second nanos are folded into the last millisecond.
    let millis = i64::from(now.nanosecond().min(999_999_999) / 1_000_000);
    let ms_into_day = i64::from(now.num_seconds_from_midnight()) * 1000 + millis;

    TimeDelta::milliseconds(days_ahead * MS_PER_DAY + (MS_PER_DAY - 1 - ms_into_day))
}

/// Whole days until the end of the week; zero throughout Sunday.
pub fn days_until_end_of_week(now: DateTime<FixedOffset>) -> i64 {
    until_end_of_week(now).num_milliseconds() / MS_PER_DAY
}

/// "X days, Y hours, Z minutes" until the end of the week.
pub fn time_remaining_text(now: DateTime<FixedOffset>) -> String {
    let left = until_end_of_week(now);
    let days = left.num_days();
    let hours = left.num_hours() % 24;
    let minutes = left.num_minutes() % 60;
    format!("{} days, {} hours, {} minutes", days, hours, minutes)
}

/// Days left in a trial that began at `start` (unix seconds) and lasts
/// `length_days`. Partial days count as a full day; zero once expired.
/// Out-of-range inputs saturate instead of wrapping.
pub fn trial_days_remaining(start: i64, length_days: i64, now: i64) -> i64 {
    let end = start.saturating_add(length_days.saturating_mul(SECS_PER_DAY));
    let left = end.saturating_sub(now);
    if left <= 0 {
        0
    } else {
        left / SECS_PER_DAY + i64::from(left % SECS_PER_DAY != 0)
    }
}

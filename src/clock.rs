use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, Utc};

const WALL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of time for cache expiry and calendar defaults.
pub trait Clock: Send + Sync {
    /// Monotonic instant used for cache entry ages.
    fn now(&self) -> Instant;

    /// Today's calendar date.
    fn today(&self) -> NaiveDate;

    /// Current UTC wall-clock time.
    fn wall_time(&self) -> NaiveDateTime;

    /// `wall_time` as `YYYY-MM-DD HH:MM:SS`, the form stored in `lastUpdated`.
    fn timestamp_text(&self) -> String {
        self.wall_time().format(WALL_TIME_FORMAT).to_string()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    fn wall_time(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

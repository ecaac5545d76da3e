use chrono::{DateTime, Datelike, Local, TimeZone};

use crate::config::ClockConfig;

/// Returned when the wall clock cannot be trusted.
pub const SENTINEL_TIMESTAMP: &str = "20250101000000";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Source of the 14-digit `YYYYMMDDHHMMSS` stamps attached to uploads.
pub trait TimestampProvider: Send + Sync {
    /// Never fails; an unusable clock yields a fixed sentinel.
    fn now(&self) -> String;
}

/// Local wall clock. Until the system clock has been synchronised (the year
/// is still before `min_valid_year`) it reports the sentinel instead.
pub struct LocalClock {
    sentinel: String,
    min_valid_year: i32,
}

impl LocalClock {
    #[must_use]
    pub fn new(config: &ClockConfig) -> Self {
        Self {
            sentinel: config.sentinel.clone(),
            min_valid_year: config.min_valid_year,
        }
    }

    fn format<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        if now.year() < self.min_valid_year {
            tracing::warn!(
                "clock reports year {}, using sentinel timestamp",
                now.year()
            );
            return self.sentinel.clone();
        }
        now.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl TimestampProvider for LocalClock {
    fn now(&self) -> String {
        self.format(&Local::now())
    }
}

/// Always returns the same stamp.
pub struct FixedClock(pub String);

impl TimestampProvider for FixedClock {
    fn now(&self) -> String {
        self.0.clone()
    }
}

//! The canonical time sample and the wall-clock sources it is captured from.
//!
//! A `TimeSample` is the only notion of "time" the dispatcher and the entity
//! state machines compare. It carries an hour, a minute and, when captured
//! from a clock, the day of the week. Ordering looks at `hour * 100 + minute`
//! and nothing else.

use crate::error::ConfigError;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A compact local time: hour, minute and an optional day of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSample {
    hour: u8,
    minute: u8,
    day_of_week: Option<Weekday>,
}

impl TimeSample {
    pub const MIDNIGHT: TimeSample = TimeSample {
        hour: 0,
        minute: 0,
        day_of_week: None,
    };

    /// Creates a threshold sample from an hour and minute. The day of the week
    /// is left empty.
    pub fn threshold(hour: u32, minute: u32) -> Result<Self, ConfigError> {
        if hour > 23 {
            return Err(ConfigError::HourOutOfRange(hour));
        }
        if minute > 59 {
            return Err(ConfigError::MinuteOutOfRange(minute));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
            day_of_week: None,
        })
    }

    /// Captures hour, minute and day of the week from a single instant.
    pub fn from_datetime<T: TimeZone>(dt: &DateTime<T>) -> Self {
        Self {
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            day_of_week: Some(dt.weekday()),
        }
    }

    /// Samples "now" from `source`, expressed in `tz`.
    pub fn capture(source: &dyn TimeSource, tz: &Tz) -> Self {
        Self::from_datetime(&source.now_utc().with_timezone(tz))
    }

    /// Drops the day of the week, turning a captured sample into a threshold.
    pub fn as_threshold(self) -> Self {
        Self {
            day_of_week: None,
            ..self
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn day_of_week(&self) -> Option<Weekday> {
        self.day_of_week
    }

    /// `hour * 100 + minute`, the total order key.
    pub fn key(&self) -> u16 {
        self.hour as u16 * 100 + self.minute as u16
    }

    /// Minutes since midnight.
    pub fn minute_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    pub fn is_less_than(&self, other: &TimeSample) -> bool {
        self.key() < other.key()
    }

    pub fn is_less_than_or_equal(&self, other: &TimeSample) -> bool {
        self.key() <= other.key()
    }

    /// Returns `true` if this threshold lies in the half-open interval
    /// `(previous, current]`.
    ///
    /// A threshold is reported on the first sample that reaches or passes it,
    /// even when several minutes were skipped between the two samples. Equal
    /// samples never report a switch.
    pub fn is_switch_time(&self, previous: &TimeSample, current: &TimeSample) -> bool {
        self.key() > previous.key() && self.key() <= current.key()
    }
}

impl fmt::Display for TimeSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A source of wall-clock time.
pub trait TimeSource: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Reads the operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl TimeSource for ManualTimeSource {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> TimeSample {
        TimeSample::threshold(h, m).unwrap()
    }

    #[test]
    fn threshold_rejects_out_of_range_values() {
        assert_eq!(TimeSample::threshold(24, 0), Err(ConfigError::HourOutOfRange(24)));
        assert_eq!(TimeSample::threshold(0, 60), Err(ConfigError::MinuteOutOfRange(60)));
        assert!(TimeSample::threshold(23, 59).is_ok());
    }

    #[test]
    fn ordering_ignores_day_of_week() {
        let monday = TimeSample::from_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap()
                .and_utc(),
        );
        assert_eq!(monday.day_of_week(), Some(Weekday::Mon));
        assert!(!monday.is_less_than(&t(8, 30)));
        assert!(monday.is_less_than_or_equal(&t(8, 30)));
        assert!(t(8, 29).is_less_than(&monday));
        assert_eq!(monday.key(), 830);
    }

    #[test]
    fn switch_time_survives_coalesced_ticks() {
        assert!(t(8, 30).is_switch_time(&t(8, 29), &t(8, 32)));
        assert!(t(8, 32).is_switch_time(&t(8, 29), &t(8, 32)));
        assert!(!t(8, 29).is_switch_time(&t(8, 29), &t(8, 32)));
    }

    #[test]
    fn switch_time_never_fires_without_progress() {
        assert!(!t(8, 30).is_switch_time(&t(8, 30), &t(8, 30)));
        assert!(!t(8, 29).is_switch_time(&t(8, 30), &t(8, 30)));
    }

    #[test]
    fn capture_uses_the_requested_timezone() {
        let source = ManualTimeSource::new(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(23, 30, 0)
                .unwrap()
                .and_utc(),
        );
        let sample = TimeSample::capture(&source, &chrono_tz::Europe::Amsterdam);
        assert_eq!(sample.to_string(), "01:30");
        assert_eq!(sample.day_of_week(), Some(Weekday::Sun));
    }
}

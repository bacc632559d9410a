//! Contains common, primitive types shared across the alarmclock crate.
//!
//! This module defines the key types used to identify owners, subscriptions and
//! entities, along with the small value types (`Status`, `DaySet`) that every
//! entity state machine works with.

use chrono::{Locale, NaiveDate, Weekday};
use serde::Deserialize;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies the owner of a group of event bus registrations.
    ///
    /// Each entity asks the bus for its own key at construction time and hands it
    /// back on teardown, which removes every handler it registered in one call.
    pub struct OwnerKey;

    /// Identifies a single registration on the event bus.
    pub struct SubscriptionId;

    /// Uniquely identifies an entity managed by the `AlarmEngine`.
    pub struct EntityId;
}

/// The on/off status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    On,
    #[default]
    Off,
}

impl Status {
    pub fn is_on(self) -> bool {
        matches!(self, Status::On)
    }
}

impl From<bool> for Status {
    fn from(on: bool) -> Self {
        if on {
            Status::On
        } else {
            Status::Off
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::On => f.write_str("ON"),
            Status::Off => f.write_str("OFF"),
        }
    }
}

/// Days of the week in display order, starting on Sunday.
pub const WEEK: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// A set of enabled days of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DaySet(u8);

impl DaySet {
    pub const fn all() -> Self {
        Self(0b0111_1111)
    }

    pub const fn none() -> Self {
        Self(0)
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_sunday()
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    /// Adds or removes `day`. Returns `true` if the set changed.
    pub fn set(&mut self, day: Weekday, enabled: bool) -> bool {
        let before = self.0;
        if enabled {
            self.0 |= Self::bit(day);
        } else {
            self.0 &= !Self::bit(day);
        }
        before != self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.iter().copied().filter(|d| self.contains(*d))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Like `Display`, with the names rendered in `locale`.
    pub fn localized(&self, locale: Locale) -> String {
        self.iter()
            .map(|day| day_name(day, locale))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The abbreviated name of `day` in `locale`, e.g. `ma` for Monday in `nl_NL`.
pub fn day_name(day: Weekday, locale: Locale) -> String {
    // 2024-01-07 is a Sunday.
    NaiveDate::from_ymd_opt(2024, 1, 7 + day.num_days_from_sunday()).map_or_else(
        || day.to_string(),
        |date| date.format_localized("%a", locale).to_string(),
    )
}

impl Default for DaySet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::none();
        for day in iter {
            set.set(day, true);
        }
        set
    }
}

/// Renders the enabled days as a comma separated list of short names,
/// e.g. `Sun, Mon, Tue`.
impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for day in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{day}")?;
            first = false;
        }
        Ok(())
    }
}

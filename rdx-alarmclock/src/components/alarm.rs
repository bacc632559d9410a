//! A clock with fixed on and off times.

use super::clock::{ClockCore, ClockSnapshot};
use super::Subscriptions;
use crate::common::{DaySet, EntityId};
use crate::dispatcher::TickDispatcher;
use crate::error::ConfigError;
use crate::events::{ClockEvent, EntityEvent};
use crate::switch::SwitchDetector;
use crate::time::TimeSample;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One of the four adjustable fields of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    OnHour,
    OnMinute,
    OffHour,
    OffMinute,
}

impl TimeField {
    fn max(self) -> u32 {
        match self {
            TimeField::OnHour | TimeField::OffHour => 23,
            TimeField::OnMinute | TimeField::OffMinute => 59,
        }
    }
}

/// How to change a [`TimeField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    Set(u32),
    /// Add one, stopping at the field's maximum.
    Increase,
    /// Subtract one, stopping at zero.
    Decrease,
}

impl Adjust {
    fn apply(self, current: u32, field: TimeField) -> Result<u32, ConfigError> {
        let max = field.max();
        match self {
            Adjust::Set(v) if v <= max => Ok(v),
            Adjust::Set(v) if max == 23 => Err(ConfigError::HourOutOfRange(v)),
            Adjust::Set(v) => Err(ConfigError::MinuteOutOfRange(v)),
            Adjust::Increase => Ok((current + 1).min(max)),
            Adjust::Decrease => Ok(current.saturating_sub(1)),
        }
    }
}

/// On at `on`, off at `off`, on every enabled day.
pub struct AlarmClock {
    core: ClockCore,
    subscriptions: Subscriptions,
}

impl AlarmClock {
    pub fn new(
        id: EntityId,
        label: &str,
        on: TimeSample,
        off: TimeSample,
        days: DaySet,
        dispatcher: Arc<TickDispatcher>,
        events: broadcast::Sender<EntityEvent>,
    ) -> Self {
        let core = ClockCore::new(id, label, SwitchDetector::new(on, off), days, events);
        let subscriptions = Subscriptions::new(dispatcher);
        let handler = core.clone();
        subscriptions.on(ClockEvent::MinuteTick, move |previous, current| {
            handler.on_minute_tick(previous, current);
            Ok(())
        });
        Self {
            core,
            subscriptions,
        }
    }

    /// Changes one hour or minute field.
    pub fn adjust(&self, field: TimeField, adjust: Adjust) -> Result<(), ConfigError> {
        let (on, off) = self.core.thresholds();
        let (mut on_h, mut on_m) = (on.hour() as u32, on.minute() as u32);
        let (mut off_h, mut off_m) = (off.hour() as u32, off.minute() as u32);
        let slot = match field {
            TimeField::OnHour => &mut on_h,
            TimeField::OnMinute => &mut on_m,
            TimeField::OffHour => &mut off_h,
            TimeField::OffMinute => &mut off_m,
        };
        *slot = adjust.apply(*slot, field)?;
        self.core.set_thresholds(
            TimeSample::threshold(on_h, on_m)?,
            TimeSample::threshold(off_h, off_m)?,
        );
        Ok(())
    }

    pub fn core(&self) -> &ClockCore {
        &self.core
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        self.core.snapshot(self.subscriptions.locale())
    }

    pub fn teardown(&mut self) -> usize {
        self.subscriptions.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_out_of_range() {
        assert_eq!(
            Adjust::Set(24).apply(0, TimeField::OnHour),
            Err(ConfigError::HourOutOfRange(24))
        );
        assert_eq!(
            Adjust::Set(60).apply(0, TimeField::OffMinute),
            Err(ConfigError::MinuteOutOfRange(60))
        );
        assert_eq!(Adjust::Set(30).apply(0, TimeField::OnMinute), Ok(30));
    }

    #[test]
    fn increase_and_decrease_saturate() {
        assert_eq!(Adjust::Increase.apply(23, TimeField::OffHour), Ok(23));
        assert_eq!(Adjust::Increase.apply(58, TimeField::OffMinute), Ok(59));
        assert_eq!(Adjust::Decrease.apply(0, TimeField::OnHour), Ok(0));
        assert_eq!(Adjust::Decrease.apply(7, TimeField::OnHour), Ok(6));
    }
}

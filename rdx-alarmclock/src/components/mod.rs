//! The entities the engine manages: fixed alarms, sun-relative clocks and
//! countdown timers.

pub mod alarm;
pub mod clock;
pub mod sun;
pub mod timer;

use crate::common::{OwnerKey, Status, SubscriptionId};
use crate::dispatcher::TickDispatcher;
use crate::error::ConfigError;
use crate::events::ClockEvent;
use crate::time::TimeSample;
use alarm::{Adjust, AlarmClock, TimeField};
use chrono::{Locale, Weekday};
use clock::{ClockCore, ClockSnapshot};
use std::sync::Arc;
use sun::SunClock;
use timer::{CountdownTimer, TimerSnapshot};
use tracing::debug;

/// The dispatcher registrations made on behalf of one entity.
///
/// Every registration shares a single owner token, so `release` drops all of
/// them with one `unregister` call. Dropping the value releases too.
pub(crate) struct Subscriptions {
    dispatcher: Arc<TickDispatcher>,
    owner: OwnerKey,
    released: bool,
}

impl Subscriptions {
    pub(crate) fn new(dispatcher: Arc<TickDispatcher>) -> Self {
        let owner = dispatcher.new_owner();
        Self {
            dispatcher,
            owner,
            released: false,
        }
    }

    pub(crate) fn on(
        &self,
        event: ClockEvent,
        handler: impl Fn(&TimeSample, &TimeSample) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.dispatcher.subscribe(event, handler, self.owner)
    }

    /// The locale weekday names are rendered in.
    pub(crate) fn locale(&self) -> Locale {
        self.dispatcher.environment().chrono_locale()
    }

    /// Removes every registration. Returns how many were still live.
    pub(crate) fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;
        let removed = self.dispatcher.unregister(self.owner);
        debug!("Released {removed} dispatcher subscriptions.");
        removed
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.release();
    }
}

/// A change requested from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCommand {
    SetStatus(Status),
    SetEnabled(bool),
    SetDayEnabled(Weekday, bool),
    Adjust(TimeField, Adjust),
    SetMaxSeconds(u64),
    Start,
    Stop,
    /// Re-derive sun thresholds now.
    Refresh,
}

impl EntityCommand {
    fn name(&self) -> &'static str {
        match self {
            EntityCommand::SetStatus(_) => "set_status",
            EntityCommand::SetEnabled(_) => "set_enabled",
            EntityCommand::SetDayEnabled(..) => "set_day_enabled",
            EntityCommand::Adjust(..) => "adjust",
            EntityCommand::SetMaxSeconds(_) => "set_max_seconds",
            EntityCommand::Start => "start",
            EntityCommand::Stop => "stop",
            EntityCommand::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    Clock(ClockSnapshot),
    Timer(TimerSnapshot),
}

impl EntitySnapshot {
    pub fn label(&self) -> &str {
        match self {
            EntitySnapshot::Clock(c) => &c.label,
            EntitySnapshot::Timer(t) => &t.label,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            EntitySnapshot::Clock(c) => c.status,
            EntitySnapshot::Timer(t) => t.status,
        }
    }
}

/// Any entity the engine can hold.
pub enum Entity {
    Alarm(AlarmClock),
    Sun(SunClock),
    Timer(CountdownTimer),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Alarm(_) => "alarm",
            Entity::Sun(s) => s.mode().kind(),
            Entity::Timer(_) => "timer",
        }
    }

    fn clock_core(&self) -> Option<&ClockCore> {
        match self {
            Entity::Alarm(a) => Some(a.core()),
            Entity::Sun(s) => Some(s.core()),
            Entity::Timer(_) => None,
        }
    }

    pub fn label(&self) -> String {
        self.snapshot().label().to_string()
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        match self {
            Entity::Alarm(a) => EntitySnapshot::Clock(a.snapshot()),
            Entity::Sun(s) => EntitySnapshot::Clock(s.snapshot()),
            Entity::Timer(t) => EntitySnapshot::Timer(t.snapshot()),
        }
    }

    /// Applies `command`. Commands the entity kind has no notion of are
    /// rejected with [`ConfigError::Unsupported`].
    pub fn apply(&self, command: EntityCommand) -> anyhow::Result<()> {
        let unsupported = || ConfigError::Unsupported {
            command: command.name(),
            kind: self.kind(),
        };
        match (self, command) {
            (Entity::Timer(t), EntityCommand::SetStatus(status)) => t.set_status(status)?,
            (Entity::Timer(t), EntityCommand::Start) => t.start()?,
            (Entity::Timer(t), EntityCommand::Stop) => t.stop(),
            (Entity::Timer(t), EntityCommand::SetMaxSeconds(secs)) => t.set_max_seconds(secs)?,
            (Entity::Alarm(a), EntityCommand::Adjust(field, adjust)) => a.adjust(field, adjust)?,
            (Entity::Sun(s), EntityCommand::Refresh) => s.refresh(),
            (_, EntityCommand::SetStatus(status)) => {
                self.clock_core().ok_or_else(unsupported)?.set_status(status)
            }
            (_, EntityCommand::SetEnabled(enabled)) => {
                self.clock_core().ok_or_else(unsupported)?.set_enabled(enabled)
            }
            (_, EntityCommand::SetDayEnabled(day, enabled)) => self
                .clock_core()
                .ok_or_else(unsupported)?
                .set_day_enabled(day, enabled),
            _ => return Err(unsupported().into()),
        }
        Ok(())
    }

    /// Drops every dispatcher subscription and background task the entity
    /// holds. Returns the number of released subscriptions.
    pub fn teardown(&mut self) -> usize {
        match self {
            Entity::Alarm(a) => a.teardown(),
            Entity::Sun(s) => s.teardown(),
            Entity::Timer(t) => {
                t.teardown();
                0
            }
        }
    }
}

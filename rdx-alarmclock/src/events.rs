//! Defines all event types produced by the alarmclock engine.
//!
//! `ClockEvent` identifies the boundary crossings the dispatcher publishes on
//! its event bus. `EntityEvent` and `SystemEvent` are broadcast on tokio
//! channels for whatever binding layer sits on top of the engine.

use crate::common::{DaySet, EntityId, Status};
use crate::time::TimeSample;
use std::fmt;

/// Boundary crossings detected between two consecutive dispatcher samples.
///
/// Every event carries `(previous_sample, current_sample)` as its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockEvent {
    MinuteTick,
    HourTick,
    /// The hour that just ended was a multiple of six.
    SixHourTick,
    DayTick,
}

impl fmt::Display for ClockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClockEvent::MinuteTick => "MINUTE_TICK",
            ClockEvent::HourTick => "HOUR_TICK",
            ClockEvent::SixHourTick => "SIX_HOUR_TICK",
            ClockEvent::DayTick => "DAY_TICK",
        };
        f.write_str(name)
    }
}

/// What caused an entity's status to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// A threshold was crossed between two samples.
    Threshold,
    /// The first sample an active entity saw placed it inside its on
    /// interval without crossing a threshold.
    Initial,
    /// An external command set the status directly.
    Command,
    /// A countdown reached zero.
    Timeout,
}

/// Notifications about an individual entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    StatusChanged {
        id: EntityId,
        status: Status,
        cause: Cause,
    },
    /// Fired alongside `StatusChanged` for threshold, command and timeout
    /// transitions.
    Triggered { id: EntityId, status: Status },
    ThresholdsChanged {
        id: EntityId,
        on: TimeSample,
        off: TimeSample,
    },
    EnabledChanged { id: EntityId, enabled: bool },
    DaysChanged { id: EntityId, days: DaySet },
    RemainingChanged { id: EntityId, seconds: u64 },
    TimedOut { id: EntityId },
}

impl EntityEvent {
    pub fn entity(&self) -> EntityId {
        match self {
            EntityEvent::StatusChanged { id, .. }
            | EntityEvent::Triggered { id, .. }
            | EntityEvent::ThresholdsChanged { id, .. }
            | EntityEvent::EnabledChanged { id, .. }
            | EntityEvent::DaysChanged { id, .. }
            | EntityEvent::RemainingChanged { id, .. }
            | EntityEvent::TimedOut { id } => *id,
        }
    }
}

/// Events related to the lifecycle of the engine itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    DispatcherStarted,
    DispatcherStopped,
    EntityAdded { id: EntityId, label: String },
    EntityRemoved { id: EntityId },
    /// The solar cache computed new sunrise/sunset times.
    SolarUpdated {
        sunrise: TimeSample,
        sunset: TimeSample,
    },
}

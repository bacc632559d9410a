//! The on/off state machine shared by every time-of-day entity.

use crate::common::{day_name, DaySet, EntityId, Status};
use crate::events::{Cause, EntityEvent};
use crate::switch::SwitchDetector;
use crate::time::TimeSample;
use chrono::{Locale, Weekday};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A point-in-time view of a clock entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSnapshot {
    pub id: EntityId,
    pub label: String,
    pub status: Status,
    pub enabled: bool,
    pub days: DaySet,
    /// Whether the current day is one of `days`.
    pub day_enabled: bool,
    pub on: TimeSample,
    pub off: TimeSample,
    /// The last sample the entity saw.
    pub now: Option<TimeSample>,
    /// `days` as short weekday names in the environment's locale.
    pub day_names: String,
    /// The weekday of `now` in the environment's locale.
    pub today: Option<String>,
}

struct ClockState {
    detector: SwitchDetector,
    status: Status,
    enabled: bool,
    days: DaySet,
    current: Option<TimeSample>,
    initialized: bool,
}

impl ClockState {
    fn gate_open(&self, sample: &TimeSample) -> bool {
        self.enabled && sample.day_of_week().map_or(true, |d| self.days.contains(d))
    }
}

/// Status, thresholds and gating for one entity.
///
/// Cloning yields another handle to the same state; the dispatcher's handlers
/// hold one, the entity's command surface holds another.
#[derive(Clone)]
pub struct ClockCore {
    id: EntityId,
    label: Arc<str>,
    state: Arc<Mutex<ClockState>>,
    events: broadcast::Sender<EntityEvent>,
}

impl ClockCore {
    pub fn new(
        id: EntityId,
        label: &str,
        detector: SwitchDetector,
        days: DaySet,
        events: broadcast::Sender<EntityEvent>,
    ) -> Self {
        Self {
            id,
            label: Arc::from(label),
            state: Arc::new(Mutex::new(ClockState {
                detector,
                status: Status::Off,
                enabled: true,
                days,
                current: None,
                initialized: false,
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EntityEvent) {
        self.events.send(event).ok();
    }

    fn change_status(&self, state: &mut ClockState, status: Status, cause: Cause) {
        state.status = status;
        info!("[{}] {} ({:?}).", self.label, status, cause);
        self.emit(EntityEvent::StatusChanged {
            id: self.id,
            status,
            cause,
        });
        if cause != Cause::Initial {
            self.emit(EntityEvent::Triggered {
                id: self.id,
                status,
            });
        }
    }

    /// Handles a `MinuteTick`.
    ///
    /// Every tick runs the switch detector over `(previous, current]`. On the
    /// first tick the entity is active for, a tick with no crossing falls back
    /// to deciding the status from `current` alone. Ticks are skipped while
    /// the entity is disabled or today is not an enabled day, and such a tick
    /// does not count as the first one.
    pub fn on_minute_tick(&self, previous: &TimeSample, current: &TimeSample) {
        let mut state = self.lock();
        state.current = Some(*current);

        if !state.gate_open(current) {
            return;
        }
        let first = !state.initialized;
        state.initialized = true;

        match state.detector.detect(previous, current) {
            Some(status) if status != state.status => {
                self.change_status(&mut state, status, Cause::Threshold);
            }
            Some(_) => {}
            None if first => {
                let status = state.detector.initial_status(current);
                if status != state.status {
                    self.change_status(&mut state, status, Cause::Initial);
                }
            }
            None => {}
        }
    }

    /// Sets the status directly, bypassing the thresholds.
    pub fn set_status(&self, status: Status) {
        let mut state = self.lock();
        if state.status != status {
            self.change_status(&mut state, status, Cause::Command);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        if state.enabled != enabled {
            state.enabled = enabled;
            // Re-derive the status on the next active tick.
            if enabled {
                state.initialized = false;
            }
            debug!("[{}] enabled = {enabled}.", self.label);
            self.emit(EntityEvent::EnabledChanged {
                id: self.id,
                enabled,
            });
        }
    }

    pub fn set_day_enabled(&self, day: Weekday, enabled: bool) {
        let mut state = self.lock();
        if state.days.set(day, enabled) {
            self.emit(EntityEvent::DaysChanged {
                id: self.id,
                days: state.days,
            });
        }
    }

    pub fn set_thresholds(&self, on: TimeSample, off: TimeSample) {
        let detector = SwitchDetector::new(on, off);
        let mut state = self.lock();
        if state.detector != detector {
            state.detector = detector;
            debug!("[{}] on {} / off {}.", self.label, detector.on, detector.off);
            self.emit(EntityEvent::ThresholdsChanged {
                id: self.id,
                on: detector.on,
                off: detector.off,
            });
        }
    }

    pub fn thresholds(&self) -> (TimeSample, TimeSample) {
        let state = self.lock();
        (state.detector.on, state.detector.off)
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Weekday names are rendered in `locale`.
    pub fn snapshot(&self, locale: Locale) -> ClockSnapshot {
        let state = self.lock();
        let today = state.current.and_then(|c| c.day_of_week());
        ClockSnapshot {
            id: self.id,
            label: self.label.to_string(),
            status: state.status,
            enabled: state.enabled,
            days: state.days,
            day_enabled: today.map_or(true, |d| state.days.contains(d)),
            on: state.detector.on,
            off: state.detector.off,
            now: state.current,
            day_names: state.days.localized(locale),
            today: today.map(|d| day_name(d, locale)),
        }
    }
}

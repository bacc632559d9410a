//! Clocks whose thresholds follow sunrise and sunset.
//!
//! Thresholds are derived from the shared [`SolarCache`] plus a signed minute
//! offset, and re-derived on every `HourTick` after asking the cache to
//! recompute. Within one dispatch, `MinuteTick` is published before
//! `HourTick`, so the minute handler of the first minute of an hour still
//! compares against the previous hour's thresholds.

use super::clock::{ClockCore, ClockSnapshot};
use super::Subscriptions;
use crate::common::{DaySet, EntityId};
use crate::dispatcher::TickDispatcher;
use crate::error::{check_offset, ConfigError};
use crate::events::{ClockEvent, EntityEvent};
use crate::solar::SolarCache;
use crate::switch::SwitchDetector;
use crate::time::TimeSample;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Which thresholds follow the sun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunMode {
    /// On at sunset + `on_offset`, off at sunrise + `off_offset`.
    Sun { on_offset: i32, off_offset: i32 },
    /// On at a fixed time, off at sunrise + `off_offset`.
    Sunrise { on: TimeSample, off_offset: i32 },
    /// On at sunset + `on_offset`, off at a fixed time.
    Sunset { on_offset: i32, off: TimeSample },
}

impl SunMode {
    pub fn validate(self) -> Result<Self, ConfigError> {
        match self {
            SunMode::Sun {
                on_offset,
                off_offset,
            } => {
                check_offset(on_offset)?;
                check_offset(off_offset)?;
            }
            SunMode::Sunrise { off_offset, .. } => {
                check_offset(off_offset)?;
            }
            SunMode::Sunset { on_offset, .. } => {
                check_offset(on_offset)?;
            }
        }
        Ok(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SunMode::Sun { .. } => "sun",
            SunMode::Sunrise { .. } => "sunrise",
            SunMode::Sunset { .. } => "sunset",
        }
    }
}

fn shifted(instant: DateTime<Utc>, offset: i32, solar: &SolarCache) -> TimeSample {
    let local = instant.with_timezone(&solar.timezone()) + Duration::minutes(offset as i64);
    TimeSample::from_datetime(&local).as_threshold()
}

/// Computes `(on, off)` for `mode` from the cache's current values.
pub fn derive_thresholds(mode: SunMode, solar: &SolarCache) -> Option<(TimeSample, TimeSample)> {
    let (sunrise, sunset) = solar.sunrise_sunset_raw()?;
    Some(match mode {
        SunMode::Sun {
            on_offset,
            off_offset,
        } => (
            shifted(sunset, on_offset, solar),
            shifted(sunrise, off_offset, solar),
        ),
        SunMode::Sunrise { on, off_offset } => (on, shifted(sunrise, off_offset, solar)),
        SunMode::Sunset { on_offset, off } => (shifted(sunset, on_offset, solar), off),
    })
}

/// A clock driven by the sun.
pub struct SunClock {
    core: ClockCore,
    mode: SunMode,
    solar: Arc<SolarCache>,
    subscriptions: Subscriptions,
}

impl SunClock {
    pub fn new(
        id: EntityId,
        label: &str,
        mode: SunMode,
        days: DaySet,
        solar: Arc<SolarCache>,
        dispatcher: Arc<TickDispatcher>,
        events: broadcast::Sender<EntityEvent>,
    ) -> Result<Self, ConfigError> {
        let mode = mode.validate()?;
        solar.recompute();
        let (on, off) = derive_thresholds(mode, &solar).unwrap_or_else(|| {
            warn!("[{label}] No solar times yet; clock stays off until the next hour.");
            (TimeSample::MIDNIGHT, TimeSample::MIDNIGHT)
        });
        let core = ClockCore::new(id, label, SwitchDetector::new(on, off), days, events);

        let subscriptions = Subscriptions::new(dispatcher);
        let minute = core.clone();
        subscriptions.on(ClockEvent::MinuteTick, move |previous, current| {
            minute.on_minute_tick(previous, current);
            Ok(())
        });
        let (hour, hour_solar) = (core.clone(), solar.clone());
        subscriptions.on(ClockEvent::HourTick, move |_, _| {
            hour_solar.recompute();
            if let Some((on, off)) = derive_thresholds(mode, &hour_solar) {
                hour.set_thresholds(on, off);
            }
            Ok(())
        });

        Ok(Self {
            core,
            mode,
            solar,
            subscriptions,
        })
    }

    /// Re-derives the thresholds from the cache without waiting for the next
    /// hour.
    pub fn refresh(&self) {
        self.solar.recompute();
        if let Some((on, off)) = derive_thresholds(self.mode, &self.solar) {
            self.core.set_thresholds(on, off);
        }
    }

    pub fn mode(&self) -> SunMode {
        self.mode
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

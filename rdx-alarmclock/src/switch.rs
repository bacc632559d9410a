//! Decides on/off transitions from a pair of consecutive samples.

use crate::common::Status;
use crate::time::TimeSample;

/// An on threshold and an off threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchDetector {
    pub on: TimeSample,
    pub off: TimeSample,
}

impl SwitchDetector {
    pub fn new(on: TimeSample, off: TimeSample) -> Self {
        Self {
            on: on.as_threshold(),
            off: off.as_threshold(),
        }
    }

    /// Returns the status the entity should switch to, if a threshold lies in
    /// `(previous, current]`.
    ///
    /// Both thresholds are checked every time. When both were crossed, OFF is
    /// evaluated last and wins.
    pub fn detect(&self, previous: &TimeSample, current: &TimeSample) -> Option<Status> {
        let mut verdict = None;
        if self.on.is_switch_time(previous, current) {
            verdict = Some(Status::On);
        }
        if self.off.is_switch_time(previous, current) {
            verdict = Some(Status::Off);
        }
        verdict
    }

    /// The status implied by `now` alone, used once when an entity starts.
    ///
    /// The on interval is half-open, `[on, off)`, matching the boundary
    /// convention of [`detect`](Self::detect): at exactly `on` the entity is ON,
    /// at exactly `off` it is OFF. When `on > off` the interval wraps past
    /// midnight. Equal thresholds mean the entity is never on.
    pub fn initial_status(&self, now: &TimeSample) -> Status {
        let (on, off, t) = (self.on.key(), self.off.key(), now.key());
        let inside = match on.cmp(&off) {
            std::cmp::Ordering::Less => on <= t && t < off,
            std::cmp::Ordering::Greater => t >= on || t < off,
            std::cmp::Ordering::Equal => false,
        };
        Status::from(inside)
    }
}

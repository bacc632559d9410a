//! Error types for configuration and entity initialisation.
//!
//! Runtime failures (handler errors, provider outages) never surface here: they
//! are logged and absorbed at the layer that sees them. `ConfigError` is the one
//! condition the crate reports upward, and it does so at entity creation.

use std::time::Duration;
use thiserror::Error;

/// Malformed or missing configuration values.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// An hour outside `0..=23`.
    #[error("hour {0} is out of range (0-23)")]
    HourOutOfRange(u32),

    /// A minute outside `0..=59`.
    #[error("minute {0} is out of range (0-59)")]
    MinuteOutOfRange(u32),

    /// A sun offset that would move a threshold by a day or more.
    #[error("offset {0} minutes is out of range (-1439..=1439)")]
    OffsetOutOfRange(i32),

    /// The dispatcher resolution must be positive and shorter than one minute.
    #[error("dispatcher resolution {0:?} must be between 1s and 59s")]
    ResolutionOutOfRange(Duration),

    /// Solar times must be refreshed between hourly and weekly.
    #[error("solar refresh of {0} hours is out of range (1-168)")]
    SolarRefreshOutOfRange(u64),

    /// The distance a location may drift before solar times are recomputed.
    #[error("distance tolerance {0} m must be a finite, non-negative number")]
    DistanceToleranceOutOfRange(f64),

    /// A countdown timer needs a positive duration.
    #[error("timer duration must be at least one second")]
    ZeroTimerDuration,

    /// A command was sent to an entity kind that does not support it.
    #[error("command `{command}` is not supported by {kind} entities")]
    Unsupported {
        command: &'static str,
        kind: &'static str,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::HourOutOfRange(_) => "config_hour_out_of_range",
            ConfigError::MinuteOutOfRange(_) => "config_minute_out_of_range",
            ConfigError::OffsetOutOfRange(_) => "config_offset_out_of_range",
            ConfigError::ResolutionOutOfRange(_) => "config_resolution_out_of_range",
            ConfigError::SolarRefreshOutOfRange(_) => "config_solar_refresh_out_of_range",
            ConfigError::DistanceToleranceOutOfRange(_) => "config_distance_tolerance_out_of_range",
            ConfigError::ZeroTimerDuration => "config_zero_timer_duration",
            ConfigError::Unsupported { .. } => "command_unsupported",
        }
    }
}

/// Validates a signed minute offset applied to a solar event.
pub(crate) fn check_offset(offset: i32) -> Result<i32, ConfigError> {
    if (-1439..=1439).contains(&offset) {
        Ok(offset)
    } else {
        Err(ConfigError::OffsetOutOfRange(offset))
    }
}

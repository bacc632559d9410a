//! Configuration for the alarmclock engine.
//!
//! These structs are deserialized from a TOML file with `serde`, with
//! `ALARMCLOCK_*` environment variables layered on top. Nested keys use a
//! double underscore, e.g. `ALARMCLOCK_SOLAR__REFRESH_HOURS=3`.
//!
//! ```toml
//! resolution_secs = 10
//! timezone = "Europe/Amsterdam"
//!
//! [location]
//! latitude = 52.37
//! longitude = 4.89
//!
//! [[entities]]
//! kind = "alarm"
//! label = "porch"
//! on_hour = 7
//! off_hour = 22
//! days = { saturday = false, sunday = false }
//! ```

use crate::common::DaySet;
use crate::dispatcher::TIME_RESOLUTION_SECONDS;
use crate::environment::Location;
use crate::error::{check_offset, ConfigError};
use crate::solar::SolarPolicy;
use crate::time::TimeSample;
use chrono::Weekday;
use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for the `AlarmEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmClockConfig {
    /// Seconds between dispatcher samples. Must be below 60.
    #[serde(default = "default_resolution_secs")]
    pub resolution_secs: u64,

    /// Used when the environment provider has no timezone. IANA names
    /// (e.g. "America/New_York").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub location: Option<Location>,

    #[serde(default)]
    pub solar: SolarConfig,

    /// Entities created when the engine starts.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

/// When cached sunrise and sunset times are recomputed.
#[derive(Debug, Clone, Deserialize)]
pub struct SolarConfig {
    #[serde(default = "default_refresh_hours")]
    pub refresh_hours: u64,
    #[serde(default = "default_distance_tolerance_m")]
    pub distance_tolerance_m: f64,
}

/// Enabled weekdays. Every day defaults to enabled.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DaysConfig {
    pub sunday: bool,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
}

/// One entity, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityConfig {
    Alarm {
        label: String,
        on_hour: u32,
        #[serde(default)]
        on_minute: u32,
        off_hour: u32,
        #[serde(default)]
        off_minute: u32,
        #[serde(default)]
        days: DaysConfig,
    },
    /// On at sunset, off at sunrise, each shifted by an offset in minutes.
    Sun {
        label: String,
        #[serde(default)]
        on_offset: i32,
        #[serde(default)]
        off_offset: i32,
        #[serde(default)]
        days: DaysConfig,
    },
    /// Fixed on time, off at sunrise plus an offset.
    Sunrise {
        label: String,
        on_hour: u32,
        #[serde(default)]
        on_minute: u32,
        #[serde(default)]
        off_offset: i32,
        #[serde(default)]
        days: DaysConfig,
    },
    /// On at sunset plus an offset, fixed off time.
    Sunset {
        label: String,
        #[serde(default)]
        on_offset: i32,
        off_hour: u32,
        #[serde(default)]
        off_minute: u32,
        #[serde(default)]
        days: DaysConfig,
    },
    Timer {
        label: String,
        max_seconds: u64,
    },
}

// --- Default value functions for serde ---

fn default_resolution_secs() -> u64 {
    TIME_RESOLUTION_SECONDS
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_refresh_hours() -> u64 {
    6
}

fn default_distance_tolerance_m() -> f64 {
    100.0
}

impl Default for AlarmClockConfig {
    fn default() -> Self {
        Self {
            resolution_secs: default_resolution_secs(),
            timezone: default_timezone(),
            locale: None,
            location: None,
            solar: SolarConfig::default(),
            entities: Vec::new(),
        }
    }
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            refresh_hours: default_refresh_hours(),
            distance_tolerance_m: default_distance_tolerance_m(),
        }
    }
}

impl Default for DaysConfig {
    fn default() -> Self {
        Self {
            sunday: true,
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
        }
    }
}

impl From<DaysConfig> for DaySet {
    fn from(d: DaysConfig) -> Self {
        [
            (Weekday::Sun, d.sunday),
            (Weekday::Mon, d.monday),
            (Weekday::Tue, d.tuesday),
            (Weekday::Wed, d.wednesday),
            (Weekday::Thu, d.thursday),
            (Weekday::Fri, d.friday),
            (Weekday::Sat, d.saturday),
        ]
        .into_iter()
        .filter_map(|(day, on)| on.then_some(day))
        .collect()
    }
}

const MAX_REFRESH_HOURS: u64 = 24 * 7;

impl SolarConfig {
    /// The cache policy these settings describe, if they are in range.
    pub fn policy(&self) -> Result<SolarPolicy, ConfigError> {
        if !(1..=MAX_REFRESH_HOURS).contains(&self.refresh_hours) {
            return Err(ConfigError::SolarRefreshOutOfRange(self.refresh_hours));
        }
        if !self.distance_tolerance_m.is_finite() || self.distance_tolerance_m < 0.0 {
            return Err(ConfigError::DistanceToleranceOutOfRange(
                self.distance_tolerance_m,
            ));
        }
        let secs = self
            .refresh_hours
            .checked_mul(3600)
            .ok_or(ConfigError::SolarRefreshOutOfRange(self.refresh_hours))?;
        Ok(SolarPolicy {
            refresh: Duration::from_secs(secs),
            distance_tolerance_m: self.distance_tolerance_m,
        })
    }
}

impl EntityConfig {
    pub fn label(&self) -> &str {
        match self {
            EntityConfig::Alarm { label, .. }
            | EntityConfig::Sun { label, .. }
            | EntityConfig::Sunrise { label, .. }
            | EntityConfig::Sunset { label, .. }
            | EntityConfig::Timer { label, .. } => label,
        }
    }

    pub fn days(&self) -> DaySet {
        match self {
            EntityConfig::Alarm { days, .. }
            | EntityConfig::Sun { days, .. }
            | EntityConfig::Sunrise { days, .. }
            | EntityConfig::Sunset { days, .. } => (*days).into(),
            EntityConfig::Timer { .. } => DaySet::all(),
        }
    }

    /// Checks every hour, minute, offset and duration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            EntityConfig::Alarm {
                on_hour,
                on_minute,
                off_hour,
                off_minute,
                ..
            } => {
                TimeSample::threshold(on_hour, on_minute)?;
                TimeSample::threshold(off_hour, off_minute)?;
            }
            EntityConfig::Sun {
                on_offset,
                off_offset,
                ..
            } => {
                check_offset(on_offset)?;
                check_offset(off_offset)?;
            }
            EntityConfig::Sunrise {
                on_hour,
                on_minute,
                off_offset,
                ..
            } => {
                TimeSample::threshold(on_hour, on_minute)?;
                check_offset(off_offset)?;
            }
            EntityConfig::Sunset {
                on_offset,
                off_hour,
                off_minute,
                ..
            } => {
                check_offset(on_offset)?;
                TimeSample::threshold(off_hour, off_minute)?;
            }
            EntityConfig::Timer { max_seconds, .. } => {
                if max_seconds == 0 {
                    return Err(ConfigError::ZeroTimerDuration);
                }
            }
        }
        Ok(())
    }
}

impl AlarmClockConfig {
    pub fn resolution(&self) -> Duration {
        Duration::from_secs(self.resolution_secs)
    }

    /// Rejects the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..60).contains(&self.resolution_secs) {
            return Err(ConfigError::ResolutionOutOfRange(self.resolution()));
        }
        self.solar.policy()?;
        self.entities.iter().try_for_each(EntityConfig::validate)
    }

    /// Loads a TOML file, applies `ALARMCLOCK_*` overrides and validates the
    /// result.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::build(Config::builder().add_source(File::from(path.as_ref())))
    }

    /// Like [`load`](Self::load), from TOML text.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(source, FileFormat::Toml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> anyhow::Result<Self> {
        let config: Self = builder
            .add_source(
                Environment::with_prefix("ALARMCLOCK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_uses_defaults() {
        let config = AlarmClockConfig::from_toml_str("").unwrap();
        assert_eq!(config.resolution_secs, 10);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.solar.policy(), Ok(SolarPolicy::default()));
        assert!(config.entities.is_empty());
    }

    #[test]
    fn parses_entities_and_days() {
        let config = AlarmClockConfig::from_toml_str(
            r#"
            timezone = "Europe/Amsterdam"

            [location]
            latitude = 52.37
            longitude = 4.89

            [[entities]]
            kind = "alarm"
            label = "porch"
            on_hour = 7
            off_hour = 22
            off_minute = 30
            days = { saturday = false, sunday = false }

            [[entities]]
            kind = "sunset"
            label = "garden"
            on_offset = -15
            off_hour = 23

            [[entities]]
            kind = "timer"
            label = "tea"
            max_seconds = 180
            "#,
        )
        .unwrap();

        assert_eq!(config.timezone, chrono_tz::Europe::Amsterdam);
        assert_eq!(config.location, Some(Location::new(52.37, 4.89)));
        assert_eq!(config.entities.len(), 3);

        let porch = &config.entities[0];
        assert_eq!(porch.label(), "porch");
        assert!(!porch.days().contains(Weekday::Sat));
        assert!(porch.days().contains(Weekday::Wed));
        assert!(matches!(
            config.entities[1],
            EntityConfig::Sunset { on_offset: -15, off_hour: 23, off_minute: 0, .. }
        ));
        assert!(matches!(config.entities[2], EntityConfig::Timer { max_seconds: 180, .. }));
    }

    #[test]
    fn validation_fails_fast() {
        let mut config = AlarmClockConfig::default();
        config.resolution_secs = 60;
        assert!(matches!(config.validate(), Err(ConfigError::ResolutionOutOfRange(_))));

        config.resolution_secs = 10;
        config.entities.push(EntityConfig::Alarm {
            label: "bad".into(),
            on_hour: 25,
            on_minute: 0,
            off_hour: 1,
            off_minute: 0,
            days: DaysConfig::default(),
        });
        assert_eq!(config.validate(), Err(ConfigError::HourOutOfRange(25)));

        config.entities[0] = EntityConfig::Sun {
            label: "bad".into(),
            on_offset: 0,
            off_offset: 1440,
            days: DaysConfig::default(),
        };
        assert_eq!(config.validate(), Err(ConfigError::OffsetOutOfRange(1440)));

        config.entities[0] = EntityConfig::Timer {
            label: "bad".into(),
            max_seconds: 0,
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimerDuration));
    }

    #[test]
    fn solar_settings_are_range_checked() {
        let mut config = AlarmClockConfig::default();
        config.solar.refresh_hours = u64::MAX;
        assert_eq!(
            config.validate(),
            Err(ConfigError::SolarRefreshOutOfRange(u64::MAX))
        );
        config.solar.refresh_hours = 0;
        assert_eq!(config.validate(), Err(ConfigError::SolarRefreshOutOfRange(0)));
        config.solar.refresh_hours = 168;
        assert!(config.validate().is_ok());

        config.solar.distance_tolerance_m = -1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DistanceToleranceOutOfRange(-1.0))
        );
        config.solar.distance_tolerance_m = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DistanceToleranceOutOfRange(d)) if d.is_nan()
        ));
        config.solar.distance_tolerance_m = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_refresh_is_rejected_on_load() {
        let err = AlarmClockConfig::from_toml_str("[solar]\nrefresh_hours = 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SolarRefreshOutOfRange(_))
        ));
    }

    #[test]
    fn load_reads_a_toml_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alarmclock.toml");
        std::fs::write(
            &path,
            "resolution_secs = 5\n[solar]\nrefresh_hours = 3\n[[entities]]\nkind = \"sun\"\nlabel = \"lamp\"\n",
        )
        .unwrap();

        let config = AlarmClockConfig::load(&path).unwrap();
        assert_eq!(config.resolution(), Duration::from_secs(5));
        assert_eq!(
            config.solar.policy().map(|p| p.refresh),
            Ok(Duration::from_secs(3 * 3600))
        );
        assert!(matches!(
            config.entities[0],
            EntityConfig::Sun { on_offset: 0, off_offset: 0, .. }
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(AlarmClockConfig::load(temp_dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn invalid_file_is_rejected_on_load() {
        let err = AlarmClockConfig::from_toml_str("resolution_secs = 0").unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}

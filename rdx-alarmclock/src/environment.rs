//! Locale, timezone and location, with fallbacks.
//!
//! The host system supplies these through an [`EnvironmentProvider`]. Any value
//! the provider cannot give yet is replaced by a default, so the rest of the
//! crate never has to handle a missing timezone or coordinate.

use chrono::Locale;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Used when no location is configured or provided.
pub const DEFAULT_LOCATION: Location = Location {
    latitude: 51.916_666_7,
    longitude: 4.5,
};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn distance_m(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Supplies the current locale, timezone and coordinates. Each may be
/// unavailable while the host is still starting up.
pub trait EnvironmentProvider: Send + Sync {
    fn locale(&self) -> Option<String>;
    fn timezone(&self) -> Option<Tz>;
    fn location(&self) -> Option<Location>;
}

/// A provider whose values can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticProvider {
    values: Mutex<(Option<String>, Option<Tz>, Option<Location>)>,
}

impl StaticProvider {
    pub fn new(locale: Option<String>, timezone: Option<Tz>, location: Option<Location>) -> Self {
        Self {
            values: Mutex::new((locale, timezone, location)),
        }
    }

    pub fn set_timezone(&self, tz: Option<Tz>) {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).1 = tz;
    }

    pub fn set_location(&self, location: Option<Location>) {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).2 = location;
    }

    pub fn set_locale(&self, locale: Option<String>) {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).0 = locale;
    }
}

impl EnvironmentProvider for StaticProvider {
    fn locale(&self) -> Option<String> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).0.clone()
    }

    fn timezone(&self) -> Option<Tz> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).1
    }

    fn location(&self) -> Option<Location> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).2
    }
}

/// The provider plus the defaults used when it has nothing to offer.
pub struct SystemEnvironment {
    provider: Arc<dyn EnvironmentProvider>,
    default_timezone: Tz,
    locale: Mutex<Option<String>>,
}

impl SystemEnvironment {
    pub fn new(provider: Arc<dyn EnvironmentProvider>, default_timezone: Tz) -> Self {
        Self {
            provider,
            default_timezone,
            locale: Mutex::new(None),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.provider.timezone().unwrap_or(self.default_timezone)
    }

    pub fn location(&self) -> Location {
        self.provider.location().unwrap_or(DEFAULT_LOCATION)
    }

    /// The locale seen by the last [`refresh_locale`](Self::refresh_locale).
    pub fn locale(&self) -> String {
        let cached = self.locale.lock().unwrap_or_else(PoisonError::into_inner).clone();
        cached.unwrap_or_else(|| self.current_locale())
    }

    /// [`locale`](Self::locale) as a formatting locale. Names chrono does
    /// not know fall back to `POSIX`.
    pub fn chrono_locale(&self) -> Locale {
        Locale::try_from(self.locale().as_str()).unwrap_or(Locale::POSIX)
    }

    fn current_locale(&self) -> String {
        self.provider
            .locale()
            .or_else(|| std::env::var("LANG").ok().filter(|l| !l.is_empty()))
            .map(|l| l.split('.').next().unwrap_or_default().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "en_US".to_string())
    }

    /// Re-reads the locale from the provider. Returns `true` if it changed.
    pub fn refresh_locale(&self) -> bool {
        let fresh = self.current_locale();
        let mut cached = self.locale.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.as_deref() == Some(fresh.as_str()) {
            return false;
        }
        match cached.as_deref() {
            Some(old) => info!("Locale changed from {old} to {fresh}."),
            None => debug!("Locale is {fresh}."),
        }
        *cached = Some(fresh);
        true
    }
}

//! Sunrise and sunset times, cached per location and timezone.
//!
//! Solar position only depends on where and when, so one `SolarCache` serves
//! every sun-relative entity. `recompute` is cheap to call often: it only runs
//! the calculator when [`should_recompute`] says the inputs moved or the last
//! result went stale.

use crate::environment::{Location, SystemEnvironment};
use crate::events::SystemEvent;
use crate::time::{TimeSample, TimeSource};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Converts a date and position into sunrise and sunset instants.
pub trait SolarCalculator: Send + Sync {
    /// Returns `None` when the sun does not rise or set on `date` at this
    /// position, or the coordinates are invalid.
    fn compute(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)>;
}

/// The default calculator, backed by the `sunrise` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SunriseCalculator;

impl SolarCalculator for SunriseCalculator {
    fn compute(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        use sunrise::{Coordinates, SolarDay, SolarEvent};
        let coord = Coordinates::new(latitude, longitude)?;
        let day = SolarDay::new(coord, date);
        let sunrise = day.event_time(SolarEvent::Sunrise);
        let sunset = day.event_time(SolarEvent::Sunset);
        (sunrise < sunset).then_some((sunrise, sunset))
    }
}

/// When a cached result must be thrown away.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPolicy {
    pub refresh: Duration,
    pub distance_tolerance_m: f64,
}

impl Default for SolarPolicy {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(6 * 3600),
            distance_tolerance_m: 100.0,
        }
    }
}

/// The inputs a computation depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarInputs {
    pub location: Location,
    pub timezone: Tz,
}

/// One computation result.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarSnapshot {
    pub inputs: SolarInputs,
    pub computed_at: DateTime<Utc>,
    pub sunrise_utc: DateTime<Utc>,
    pub sunset_utc: DateTime<Utc>,
    pub sunrise: TimeSample,
    pub sunset: TimeSample,
}

/// Decides whether `previous` is still usable for `inputs` at `now`.
pub fn should_recompute(
    previous: Option<&SolarSnapshot>,
    inputs: &SolarInputs,
    now: DateTime<Utc>,
    policy: &SolarPolicy,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if previous.inputs.timezone.name() != inputs.timezone.name() {
        return true;
    }
    if previous.inputs.location.distance_m(&inputs.location) > policy.distance_tolerance_m {
        return true;
    }
    match (now - previous.computed_at).to_std() {
        Ok(age) => age > policy.refresh,
        // Clock went backwards.
        Err(_) => true,
    }
}

/// Process-wide cache of the current sunrise and sunset.
pub struct SolarCache {
    environment: Arc<SystemEnvironment>,
    calculator: Arc<dyn SolarCalculator>,
    clock: Arc<dyn TimeSource>,
    policy: SolarPolicy,
    cell: Mutex<Option<SolarSnapshot>>,
    system_event_sender: Option<broadcast::Sender<SystemEvent>>,
}

impl SolarCache {
    pub fn new(
        environment: Arc<SystemEnvironment>,
        calculator: Arc<dyn SolarCalculator>,
        clock: Arc<dyn TimeSource>,
        policy: SolarPolicy,
    ) -> Self {
        Self {
            environment,
            calculator,
            clock,
            policy,
            cell: Mutex::new(None),
            system_event_sender: None,
        }
    }

    /// Broadcasts `SystemEvent::SolarUpdated` on `sender` after each computation.
    pub fn with_events(mut self, sender: broadcast::Sender<SystemEvent>) -> Self {
        self.system_event_sender = Some(sender);
        self
    }

    /// Recomputes sunrise and sunset if the inputs changed or the cached
    /// result is stale. Returns `true` if new values were stored.
    pub fn recompute(&self) -> bool {
        let inputs = SolarInputs {
            location: self.environment.location(),
            timezone: self.environment.timezone(),
        };
        let now = self.clock.now_utc();

        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        if !should_recompute(cell.as_ref(), &inputs, now, &self.policy) {
            debug!("Solar cache is current.");
            return false;
        }

        let today = now.with_timezone(&inputs.timezone).date_naive();
        let loc = inputs.location;
        let Some((sunrise_utc, sunset_utc)) =
            self.calculator.compute(loc.latitude, loc.longitude, today)
        else {
            warn!("No sunrise/sunset at {loc} on {today}; keeping previous values.");
            return false;
        };

        let snapshot = SolarSnapshot {
            inputs,
            computed_at: now,
            sunrise_utc,
            sunset_utc,
            sunrise: TimeSample::from_datetime(&sunrise_utc.with_timezone(&inputs.timezone))
                .as_threshold(),
            sunset: TimeSample::from_datetime(&sunset_utc.with_timezone(&inputs.timezone))
                .as_threshold(),
        };
        info!(
            "Sunrise {} / sunset {} at {loc} ({}).",
            snapshot.sunrise,
            snapshot.sunset,
            inputs.timezone.name()
        );
        if let Some(sender) = &self.system_event_sender {
            sender
                .send(SystemEvent::SolarUpdated {
                    sunrise: snapshot.sunrise,
                    sunset: snapshot.sunset,
                })
                .ok();
        }
        *cell = Some(snapshot);
        true
    }

    /// The cached sunrise in local time.
    pub fn sunrise(&self) -> Option<TimeSample> {
        self.snapshot().map(|s| s.sunrise)
    }

    /// The cached sunset in local time.
    pub fn sunset(&self) -> Option<TimeSample> {
        self.snapshot().map(|s| s.sunset)
    }

    /// The cached sunrise and sunset as UTC instants.
    pub fn sunrise_sunset_raw(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.snapshot().map(|s| (s.sunrise_utc, s.sunset_utc))
    }

    pub fn snapshot(&self) -> Option<SolarSnapshot> {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The timezone the cached values were computed for.
    pub fn timezone(&self) -> Tz {
        self.snapshot()
            .map(|s| s.inputs.timezone)
            .unwrap_or_else(|| self.environment.timezone())
    }

    pub fn policy(&self) -> &SolarPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticProvider;
    use crate::time::ManualTimeSource;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed sunrise/sunset and counts calls.
    struct FixedCalculator {
        calls: AtomicUsize,
    }

    impl SolarCalculator for FixedCalculator {
        fn compute(
            &self,
            _latitude: f64,
            _longitude: f64,
            date: NaiveDate,
        ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            Some((
                Utc.from_utc_datetime(&date.and_hms_opt(5, 30 + n, 0)?),
                Utc.from_utc_datetime(&date.and_hms_opt(20, 15, 0)?),
            ))
        }
    }

    fn fixture() -> (
        Arc<StaticProvider>,
        Arc<ManualTimeSource>,
        Arc<FixedCalculator>,
        SolarCache,
    ) {
        let provider = Arc::new(StaticProvider::new(
            None,
            Some(Tz::UTC),
            Some(Location::new(51.9, 4.5)),
        ));
        let clock = Arc::new(ManualTimeSource::new(
            Utc.with_ymd_and_hms(2024, 3, 20, 0, 5, 0).unwrap(),
        ));
        let calculator = Arc::new(FixedCalculator {
            calls: AtomicUsize::new(0),
        });
        let env = Arc::new(SystemEnvironment::new(provider.clone(), Tz::UTC));
        let cache = SolarCache::new(env, calculator.clone(), clock.clone(), SolarPolicy::default());
        (provider, clock, calculator, cache)
    }

    #[test]
    fn second_call_within_refresh_returns_cached_values() {
        let (_, clock, calc, cache) = fixture();
        assert!(cache.recompute());
        let first = cache.sunrise_sunset_raw();
        clock.advance(chrono::Duration::hours(5));
        assert!(!cache.recompute());
        assert_eq!(cache.sunrise_sunset_raw(), first);
        assert_eq!(calc.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.sunrise().unwrap().to_string(), "05:30");
        assert_eq!(cache.sunset().unwrap().to_string(), "20:15");
    }

    #[test]
    fn stale_result_is_recomputed() {
        let (_, clock, calc, cache) = fixture();
        cache.recompute();
        clock.advance(chrono::Duration::hours(6) + chrono::Duration::seconds(1));
        assert!(cache.recompute());
        assert_eq!(calc.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.sunrise().unwrap().to_string(), "05:31");
    }

    #[test]
    fn moving_beyond_tolerance_forces_recompute() {
        let (provider, _, calc, cache) = fixture();
        cache.recompute();
        provider.set_location(Some(Location::new(51.9003, 4.5)));
        assert!(!cache.recompute(), "33 m is inside the tolerance");
        provider.set_location(Some(Location::new(51.91, 4.5)));
        assert!(cache.recompute());
        assert_eq!(calc.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timezone_change_forces_recompute() {
        let (provider, _, _, cache) = fixture();
        cache.recompute();
        provider.set_timezone(Some(chrono_tz::Europe::Amsterdam));
        assert!(cache.recompute());
        assert_eq!(cache.timezone(), chrono_tz::Europe::Amsterdam);
        assert_eq!(cache.sunset().unwrap().to_string(), "21:15");
    }

    #[test]
    fn should_recompute_without_history() {
        let inputs = SolarInputs {
            location: Location::new(0.0, 0.0),
            timezone: Tz::UTC,
        };
        assert!(should_recompute(None, &inputs, Utc::now(), &SolarPolicy::default()));
    }

    #[test]
    fn sunrise_crate_gives_plausible_times() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let (rise, set) = SunriseCalculator.compute(51.9167, 4.5, date).unwrap();
        assert!(rise < set);
        assert!((set - rise) > chrono::Duration::hours(15));
    }
}

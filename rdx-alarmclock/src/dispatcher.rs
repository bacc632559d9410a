//! The tick dispatcher: one periodic task that samples wall time and publishes
//! boundary crossings.
//!
//! While running, the dispatcher captures a [`TimeSample`] every `resolution`,
//! compares it with the previous one and publishes, in order:
//!
//! 1. `MinuteTick` when the minute changed,
//! 2. `HourTick` when the hour changed,
//! 3. `SixHourTick` when the hour changed and the *previous* hour is a multiple
//!    of six,
//! 4. `DayTick` when the day of the week changed.
//!
//! The very first sample only establishes the baseline.

use crate::bus::EventBus;
use crate::common::{OwnerKey, SubscriptionId};
use crate::environment::SystemEnvironment;
use crate::error::ConfigError;
use crate::events::{ClockEvent, SystemEvent};
use crate::time::{TimeSample, TimeSource};
use anyhow::Context;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

/// Default period between samples.
pub const TIME_RESOLUTION_SECONDS: u64 = 10;

/// The bus type the dispatcher publishes on.
pub type ClockBus = EventBus<ClockEvent, TimeSample, TimeSample>;

struct Shared {
    bus: ClockBus,
    clock: Arc<dyn TimeSource>,
    environment: Arc<SystemEnvironment>,
    last_sample: Mutex<Option<TimeSample>>,
}

impl Shared {
    fn tick(&self) {
        let now = TimeSample::capture(self.clock.as_ref(), &self.environment.timezone());
        self.process_sample(now);
    }

    fn process_sample(&self, now: TimeSample) {
        let previous = {
            let mut last = self.last_sample.lock().unwrap_or_else(PoisonError::into_inner);
            last.replace(now)
        };
        let Some(previous) = previous else {
            debug!("Baseline sample {now}.");
            return;
        };
        trace!("Tick {previous} -> {now}.");

        if previous.minute() != now.minute() {
            self.bus.publish(ClockEvent::MinuteTick, &previous, &now);
        }
        if previous.hour() != now.hour() {
            debug!("Hour tick.");
            self.bus.publish(ClockEvent::HourTick, &previous, &now);
            if previous.hour() % 6 == 0 {
                debug!("Six hour tick.");
                self.bus.publish(ClockEvent::SixHourTick, &previous, &now);
            }
        }
        if previous.day_of_week() != now.day_of_week() {
            debug!("Day tick.");
            self.bus.publish(ClockEvent::DayTick, &previous, &now);
        }
    }
}

/// The single clock driving every entity.
pub struct TickDispatcher {
    shared: Arc<Shared>,
    resolution: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    owner: OwnerKey,
    system_event_sender: broadcast::Sender<SystemEvent>,
}

impl TickDispatcher {
    /// Creates a stopped dispatcher. `resolution` must be between 1 and 59
    /// seconds so no minute boundary can be skipped.
    pub fn new(
        clock: Arc<dyn TimeSource>,
        environment: Arc<SystemEnvironment>,
        resolution: Duration,
        system_event_sender: broadcast::Sender<SystemEvent>,
    ) -> Result<Self, ConfigError> {
        if resolution < Duration::from_secs(1) || resolution >= Duration::from_secs(60) {
            return Err(ConfigError::ResolutionOutOfRange(resolution));
        }
        let shared = Arc::new(Shared {
            bus: EventBus::new(),
            clock,
            environment,
            last_sample: Mutex::new(None),
        });

        // Keep the locale snapshot current.
        let owner = shared.bus.new_owner();
        let env = shared.environment.clone();
        shared.bus.subscribe(
            ClockEvent::MinuteTick,
            move |_, _| {
                env.refresh_locale();
                Ok(())
            },
            owner,
        );

        Ok(Self {
            shared,
            resolution,
            task: Mutex::new(None),
            owner,
            system_event_sender,
        })
    }

    /// Starts the periodic task. Does nothing if it is already running.
    ///
    /// Ticks are scheduled at a fixed rate: a slow tick delays the next one
    /// but the schedule does not drift. Must be called from within a tokio
    /// runtime.
    pub fn init(&self) -> anyhow::Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("the tick dispatcher needs a tokio runtime")?;

        let shared = self.shared.clone();
        let resolution = self.resolution;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(resolution);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if catch_unwind(AssertUnwindSafe(|| shared.tick())).is_err() {
                    error!("Error executing tick; the next tick will run as scheduled.");
                }
            }
        }));
        info!("Tick dispatcher started at {:?} resolution.", self.resolution);
        self.system_event_sender
            .send(SystemEvent::DispatcherStarted)
            .ok();
        Ok(())
    }

    /// Cancels the periodic task and forgets the last sample. Does nothing if
    /// the dispatcher is not running.
    pub fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            *self
                .shared
                .last_sample
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
            info!("Tick dispatcher stopped.");
            self.system_event_sender
                .send(SystemEvent::DispatcherStopped)
                .ok();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// The most recent sample, or `None` before the first tick.
    pub fn last_sample(&self) -> Option<TimeSample> {
        *self
            .shared
            .last_sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh sample of "now" in the environment's timezone.
    pub fn sample_now(&self) -> TimeSample {
        TimeSample::capture(self.shared.clock.as_ref(), &self.shared.environment.timezone())
    }

    /// Runs one dispatch step against the configured time source.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Runs one dispatch step with an explicit sample.
    pub fn process_sample(&self, now: TimeSample) {
        self.shared.process_sample(now);
    }

    pub fn environment(&self) -> &Arc<SystemEnvironment> {
        &self.shared.environment
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.shared.clock
    }

    pub fn new_owner(&self) -> OwnerKey {
        self.shared.bus.new_owner()
    }

    pub fn subscribe(
        &self,
        event: ClockEvent,
        handler: impl Fn(&TimeSample, &TimeSample) -> anyhow::Result<()> + Send + Sync + 'static,
        owner: OwnerKey,
    ) -> SubscriptionId {
        self.shared.bus.subscribe(event, handler, owner)
    }

    pub fn subscribe_once(
        &self,
        event: ClockEvent,
        handler: impl Fn(&TimeSample, &TimeSample) -> anyhow::Result<()> + Send + Sync + 'static,
        owner: OwnerKey,
    ) -> SubscriptionId {
        self.shared.bus.subscribe_once(event, handler, owner)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    pub fn unregister(&self, owner: OwnerKey) -> usize {
        self.shared.bus.unregister(owner)
    }

    pub fn publish(&self, event: ClockEvent, previous: &TimeSample, current: &TimeSample) {
        self.shared.bus.publish(event, previous, current);
    }

    pub fn bus(&self) -> &ClockBus {
        &self.shared.bus
    }
}

impl Drop for TickDispatcher {
    fn drop(&mut self) {
        self.stop();
        self.shared.bus.unregister(self.owner);
    }
}

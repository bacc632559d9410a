//! A countdown that switches off on its own after a fixed duration.
//!
//! The timer does not listen to the tick dispatcher. While it runs it owns a
//! one-second interval task, which is cancelled when the countdown ends or
//! the timer is stopped.

use crate::common::{EntityId, Status};
use crate::error::ConfigError;
use crate::events::{Cause, EntityEvent};
use anyhow::Context;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// A point-in-time view of a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub id: EntityId,
    pub label: String,
    pub status: Status,
    pub timeout: bool,
    pub max_seconds: u64,
    pub remaining_seconds: u64,
}

struct TimerState {
    max_seconds: u64,
    status: Status,
    timeout: bool,
    started_at: Option<Instant>,
    last_seconds: u64,
    task: Option<JoinHandle<()>>,
}

impl TimerState {
    fn remaining(&self) -> u64 {
        match (self.status, self.started_at) {
            (Status::On, Some(start)) => self.max_seconds.saturating_sub(start.elapsed().as_secs()),
            _ => 0,
        }
    }
}

struct Inner {
    id: EntityId,
    label: String,
    state: Mutex<TimerState>,
    events: broadcast::Sender<EntityEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EntityEvent) {
        self.events.send(event).ok();
    }

    /// One countdown step. Returns `true` once the timer has expired.
    fn step(&self) -> bool {
        let mut state = self.lock();
        if state.status == Status::Off {
            return true;
        }
        let remaining = state.remaining();
        if remaining == state.last_seconds {
            return false;
        }
        state.last_seconds = remaining;
        self.emit(EntityEvent::RemainingChanged {
            id: self.id,
            seconds: remaining,
        });
        if remaining > 0 {
            return false;
        }

        state.timeout = true;
        state.status = Status::Off;
        state.started_at = None;
        state.task = None;
        info!("[{}] timed out.", self.label);
        self.emit(EntityEvent::TimedOut { id: self.id });
        self.emit(EntityEvent::Triggered {
            id: self.id,
            status: Status::Off,
        });
        self.emit(EntityEvent::StatusChanged {
            id: self.id,
            status: Status::Off,
            cause: Cause::Timeout,
        });
        true
    }
}

/// A countdown timer entity.
pub struct CountdownTimer {
    inner: Arc<Inner>,
}

impl CountdownTimer {
    pub fn new(
        id: EntityId,
        label: &str,
        max_seconds: u64,
        events: broadcast::Sender<EntityEvent>,
    ) -> Result<Self, ConfigError> {
        if max_seconds == 0 {
            return Err(ConfigError::ZeroTimerDuration);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                label: label.to_string(),
                state: Mutex::new(TimerState {
                    max_seconds,
                    status: Status::Off,
                    timeout: false,
                    started_at: None,
                    last_seconds: 0,
                    task: None,
                }),
                events,
            }),
        })
    }

    /// Starts counting down from `max_seconds`. Does nothing if the timer is
    /// already running.
    pub fn start(&self) -> anyhow::Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().context("the timer needs a tokio runtime")?;
        let mut state = self.inner.lock();
        if state.status == Status::On {
            return Ok(());
        }
        state.status = Status::On;
        state.timeout = false;
        state.started_at = Some(Instant::now());
        state.last_seconds = state.remaining();
        info!("[{}] started, {}s.", self.inner.label, state.max_seconds);

        let inner = self.inner.clone();
        state.task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticker.tick().await;
                if inner.step() {
                    break;
                }
            }
        }));

        let (id, seconds) = (self.inner.id, state.last_seconds);
        drop(state);
        self.inner.emit(EntityEvent::Triggered {
            id,
            status: Status::On,
        });
        self.inner.emit(EntityEvent::StatusChanged {
            id,
            status: Status::On,
            cause: Cause::Command,
        });
        self.inner.emit(EntityEvent::RemainingChanged { id, seconds });
        Ok(())
    }

    /// Stops the countdown early. The timeout flag stays clear.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.status == Status::Off {
            return;
        }
        state.status = Status::Off;
        state.started_at = None;
        state.last_seconds = 0;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        drop(state);
        info!("[{}] stopped.", self.inner.label);
        self.inner.emit(EntityEvent::StatusChanged {
            id: self.inner.id,
            status: Status::Off,
            cause: Cause::Command,
        });
        self.inner.emit(EntityEvent::RemainingChanged {
            id: self.inner.id,
            seconds: 0,
        });
    }

    pub fn set_status(&self, status: Status) -> anyhow::Result<()> {
        match status {
            Status::On => self.start(),
            Status::Off => {
                self.stop();
                Ok(())
            }
        }
    }

    /// Changes the duration. A running countdown uses the new value from its
    /// next step.
    pub fn set_max_seconds(&self, max_seconds: u64) -> Result<(), ConfigError> {
        if max_seconds == 0 {
            return Err(ConfigError::ZeroTimerDuration);
        }
        self.inner.lock().max_seconds = max_seconds;
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    pub fn timed_out(&self) -> bool {
        self.inner.lock().timeout
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.inner.lock().remaining()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let state = self.inner.lock();
        TimerSnapshot {
            id: self.inner.id,
            label: self.inner.label.clone(),
            status: state.status,
            timeout: state.timeout,
            max_seconds: state.max_seconds,
            remaining_seconds: state.remaining(),
        }
    }

    pub fn teardown(&mut self) {
        if let Some(task) = self.inner.lock().task.take() {
            task.abort();
        }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.teardown();
    }
}

//! # Alarmclock
//!
//! Scheduled on/off switching driven by a single shared time source.
//!
//! One tick dispatcher samples the wall clock at a fixed resolution, detects
//! minute, hour, six-hour and day boundary crossings, and fans them out over a
//! keyed event bus. Entities (fixed alarms, sun-relative clocks and countdown
//! timers) subscribe to those crossings and decide from a
//! `(previous, current)` sample pair whether one of their thresholds was
//! passed, so a delayed or coalesced tick never loses a transition.
//!
//! ## Core Concepts
//!
//! - **TickDispatcher**: the periodic sampler and publisher of `ClockEvent`s.
//! - **EventBus**: subscribe, subscribe-once and unregister-by-owner.
//! - **SwitchDetector**: the half-open `(previous, current]` threshold test.
//! - **SolarCache**: sunrise and sunset, recomputed only when stale or when the
//!   location or timezone changed.
//! - **AlarmEngine**: the composition root that owns all of the above plus the
//!   entities, and broadcasts `EntityEvent`s and `SystemEvent`s.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use alarmclock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = AlarmEngine::from_config(AlarmClockConfig::default())?;
//!
//!     let mut entity_events = engine.subscribe_entity_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = entity_events.recv().await {
//!             println!("Entity event: {:?}", event);
//!         }
//!     });
//!
//!     engine
//!         .add_entity(EntityConfig::Alarm {
//!             label: "porch".into(),
//!             on_hour: 7,
//!             on_minute: 0,
//!             off_hour: 22,
//!             off_minute: 0,
//!             days: Default::default(),
//!         })
//!         .await?;
//!
//!     // Runs until Ctrl+C.
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Alarm Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bus;
pub mod common;
pub mod components;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod solar;
pub mod switch;
pub mod time;

/// A prelude module for easy importing of the most common alarmclock types.
pub mod prelude {
    pub use crate::common::{DaySet, EntityId, Status};
    pub use crate::components::alarm::{Adjust, TimeField};
    pub use crate::components::{EntityCommand, EntitySnapshot};
    pub use crate::config::{AlarmClockConfig, EntityConfig};
    pub use crate::engine::AlarmEngine;
    pub use crate::error::ConfigError;
    pub use crate::events::{Cause, ClockEvent, EntityEvent, SystemEvent};
    pub use crate::time::TimeSample;
}

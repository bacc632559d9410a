//! The engine that owns the dispatcher, the solar cache and every entity.

use crate::common::EntityId;
use crate::components::alarm::AlarmClock;
use crate::components::sun::{SunClock, SunMode};
use crate::components::timer::CountdownTimer;
use crate::components::{Entity, EntityCommand, EntitySnapshot};
use crate::config::{AlarmClockConfig, EntityConfig};
use crate::dispatcher::TickDispatcher;
use crate::environment::{EnvironmentProvider, StaticProvider, SystemEnvironment};
use crate::events::{EntityEvent, SystemEvent};
use crate::solar::{SolarCache, SolarCalculator, SunriseCalculator};
use crate::time::{SystemTimeSource, TimeSample, TimeSource};
use anyhow::anyhow;
use slotmap::SlotMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// The main alarmclock engine.
///
/// This struct is the composition root: it creates the single tick dispatcher
/// and solar cache, builds entities from configuration or at runtime, and
/// routes external commands to them. The engine is cheap to clone; clones
/// share the same running instance.
#[derive(Clone)]
pub struct AlarmEngine {
    config: Arc<AlarmClockConfig>,
    dispatcher: Arc<TickDispatcher>,
    solar: Arc<SolarCache>,
    entity_event_sender: broadcast::Sender<EntityEvent>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    entities: Arc<RwLock<SlotMap<EntityId, Entity>>>,
    configured: Arc<AtomicBool>,
}

// Construction and lifecycle.
impl AlarmEngine {
    /// Creates a stopped engine with injected collaborators.
    pub fn new(
        config: AlarmClockConfig,
        provider: Arc<dyn EnvironmentProvider>,
        calculator: Arc<dyn SolarCalculator>,
        clock: Arc<dyn TimeSource>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let (entity_event_sender, _) = broadcast::channel(256);
        let (system_event_sender, _) = broadcast::channel(64);

        let environment = Arc::new(SystemEnvironment::new(provider, config.timezone));
        let dispatcher = Arc::new(TickDispatcher::new(
            clock.clone(),
            environment.clone(),
            config.resolution(),
            system_event_sender.clone(),
        )?);
        let solar = Arc::new(
            SolarCache::new(environment, calculator, clock, config.solar.policy()?)
                .with_events(system_event_sender.clone()),
        );

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            solar,
            entity_event_sender,
            system_event_sender,
            entities: Arc::new(RwLock::new(SlotMap::with_key())),
            configured: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Creates an engine on the system clock, with locale and location taken
    /// from `config` and sunrise times from the `sunrise` crate.
    pub fn from_config(config: AlarmClockConfig) -> anyhow::Result<Self> {
        let provider = StaticProvider::new(config.locale.clone(), None, config.location);
        Self::new(
            config,
            Arc::new(provider),
            Arc::new(SunriseCalculator),
            Arc::new(SystemTimeSource),
        )
    }

    /// Creates the configured entities (once) and starts the dispatcher.
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.configured.swap(true, Ordering::SeqCst) {
            for entity in self.config.entities.iter() {
                self.add_entity(entity.clone()).await?;
            }
        }
        self.dispatcher.init()
    }

    /// Stops the dispatcher and tears down every entity. A later `start`
    /// rebuilds the configured entities from scratch.
    pub async fn shutdown(&self) {
        self.dispatcher.stop();
        let mut entities = self.entities.write().await;
        for (id, mut entity) in entities.drain() {
            entity.teardown();
            self.system_event_sender
                .send(SystemEvent::EntityRemoved { id })
                .ok();
        }
        self.configured.store(false, Ordering::SeqCst);
        info!("AlarmEngine has shut down.");
    }

    /// Runs the engine until a shutdown signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("AlarmEngine starting up...");
        self.start().await?;
        info!(
            "Engine running at {:?}. Press Ctrl+C to shut down.",
            self.dispatcher.resolution()
        );
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received.");
        self.shutdown().await;
        Ok(())
    }
}

// Public API implementation block.
impl AlarmEngine {
    /// Builds an entity from `config` and registers it with the dispatcher.
    ///
    /// Invalid hours, minutes, offsets or durations are rejected before
    /// anything is registered.
    pub async fn add_entity(&self, config: EntityConfig) -> anyhow::Result<EntityId> {
        config.validate()?;
        let label = config.label().to_string();
        let mut entities = self.entities.write().await;
        let id = entities.try_insert_with_key(|id| self.build_entity(id, &config))?;
        info!("Added {} '{label}'.", entities[id].kind());
        self.system_event_sender
            .send(SystemEvent::EntityAdded { id, label })
            .ok();
        Ok(id)
    }

    fn build_entity(&self, id: EntityId, config: &EntityConfig) -> anyhow::Result<Entity> {
        let days = config.days();
        let label = config.label();
        let events = self.entity_event_sender.clone();
        let sun = |mode: SunMode| {
            SunClock::new(
                id,
                label,
                mode,
                days,
                self.solar.clone(),
                self.dispatcher.clone(),
                events.clone(),
            )
            .map(Entity::Sun)
        };
        let entity = match *config {
            EntityConfig::Alarm {
                on_hour,
                on_minute,
                off_hour,
                off_minute,
                ..
            } => Entity::Alarm(AlarmClock::new(
                id,
                label,
                TimeSample::threshold(on_hour, on_minute)?,
                TimeSample::threshold(off_hour, off_minute)?,
                days,
                self.dispatcher.clone(),
                events.clone(),
            )),
            EntityConfig::Sun {
                on_offset,
                off_offset,
                ..
            } => sun(SunMode::Sun {
                on_offset,
                off_offset,
            })?,
            EntityConfig::Sunrise {
                on_hour,
                on_minute,
                off_offset,
                ..
            } => sun(SunMode::Sunrise {
                on: TimeSample::threshold(on_hour, on_minute)?,
                off_offset,
            })?,
            EntityConfig::Sunset {
                on_offset,
                off_hour,
                off_minute,
                ..
            } => sun(SunMode::Sunset {
                on_offset,
                off: TimeSample::threshold(off_hour, off_minute)?,
            })?,
            EntityConfig::Timer { max_seconds, .. } => {
                Entity::Timer(CountdownTimer::new(id, label, max_seconds, events.clone())?)
            }
        };
        Ok(entity)
    }

    /// Removes an entity and releases its dispatcher subscriptions.
    ///
    /// Returns `true` if the entity was found and removed.
    pub async fn remove_entity(&self, id: EntityId) -> bool {
        let Some(mut entity) = self.entities.write().await.remove(id) else {
            return false;
        };
        let released = entity.teardown();
        info!("Removed '{}' ({released} subscriptions).", entity.label());
        self.system_event_sender
            .send(SystemEvent::EntityRemoved { id })
            .ok();
        true
    }

    /// Routes an external command to an entity.
    pub async fn command(&self, id: EntityId, command: EntityCommand) -> anyhow::Result<()> {
        let entities = self.entities.read().await;
        let entity = entities
            .get(id)
            .ok_or_else(|| anyhow!("no entity with id {id:?}"))?;
        entity.apply(command).inspect_err(|e| {
            warn!("Command {command:?} on '{}' failed: {e}", entity.label());
        })
    }

    pub async fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.read().await.get(id).map(Entity::snapshot)
    }

    /// Every entity, in insertion order of their slots.
    pub async fn list(&self) -> Vec<(EntityId, EntitySnapshot)> {
        self.entities
            .read()
            .await
            .iter()
            .map(|(id, entity)| (id, entity.snapshot()))
            .collect()
    }

    pub fn dispatcher(&self) -> &Arc<TickDispatcher> {
        &self.dispatcher
    }

    pub fn solar(&self) -> &Arc<SolarCache> {
        &self.solar
    }

    pub fn config(&self) -> &AlarmClockConfig {
        &self.config
    }

    /// Subscribes to the `EntityEvent` stream.
    pub fn subscribe_entity_events(&self) -> broadcast::Receiver<EntityEvent> {
        self.entity_event_sender.subscribe()
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }
}

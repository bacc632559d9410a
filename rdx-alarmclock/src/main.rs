use alarmclock::prelude::*;
use alarmclock::{ENGINE_NAME, VERSION};
use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    // 2. Load the configuration named on the command line, if any.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {path}.");
            AlarmClockConfig::load(&path)?
        }
        None => AlarmClockConfig::default(),
    };
    info!("{ENGINE_NAME} v{VERSION}, {} entities configured.", config.entities.len());

    // 3. Create the engine.
    let engine = AlarmEngine::from_config(config)?;

    // 4. Log everything the engine reports.
    spawn_event_listeners(&engine);

    // 5. Run until Ctrl+C.
    engine.run().await?;

    Ok(())
}

fn spawn_event_listeners(engine: &AlarmEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut entity_rx = engine.subscribe_entity_events();
    tokio::spawn(async move {
        while let Ok(event) = entity_rx.recv().await {
            match event {
                EntityEvent::Triggered { id, status } => {
                    info!("[TRIGGER] => {:?} switched {}", id, status)
                }
                other => info!("[ENTITY] => {:?}", other),
            }
        }
    });
}

use alarmclock::prelude::*;
use alarmclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use anyhow::{anyhow, bail, Result};
use chrono::Weekday;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", format!("  {ENGINE_NAME} shell").cyan().bold());
    println!("{}", "-".repeat(64).dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!(
        "{}",
        "  Distributed under the MIT OR Apache-2.0 license. Use at your own risk.".dimmed()
    );
    println!("{}", "-".repeat(64).dimmed());
}

fn print_help() {
    println!("Available commands:");
    println!("  list                          - Shows entities and their handles.");
    println!("  show <H>                      - Shows one entity in detail.");
    println!("  add alarm <LABEL> <HH:MM> <HH:MM>");
    println!("  add sun <LABEL> <ON_OFFSET> <OFF_OFFSET>");
    println!("  add sunrise <LABEL> <HH:MM> <OFF_OFFSET>");
    println!("  add sunset <LABEL> <ON_OFFSET> <HH:MM>");
    println!("  add timer <LABEL> <SECONDS>   - Adds an entity and prints its handle.");
    println!("  remove <H>                    - Removes an entity.");
    println!("  on|off <H>                    - Switches an entity directly.");
    println!("  enable|disable <H>            - Enables or disables threshold switching.");
    println!("  day <H> <WEEKDAY> on|off      - Enables or disables one weekday.");
    println!("  set <H> <FIELD> <N|+|->       - FIELD: on_hour, on_minute, off_hour, off_minute, max.");
    println!("  start|stop <H>                - Starts or stops a timer.");
    println!("  sun                           - Shows today's sunrise and sunset.");
    println!("  watch on|off                  - Prints entity events as they happen.");
    println!("  exit                          - Quits the shell.");
}

fn spawn_event_listeners(engine: &AlarmEngine, watching: Arc<AtomicBool>) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            println!("\n<-- [SYSTEM EVENT] {:?}", event);
        }
    });

    let mut entity_rx = engine.subscribe_entity_events();
    tokio::spawn(async move {
        while let Ok(event) = entity_rx.recv().await {
            if !watching.load(Ordering::Relaxed) {
                continue;
            }
            match event {
                EntityEvent::Triggered { id, status } => {
                    println!("<-- [TRIGGER] {:?} switched {}", id, status.to_string().green())
                }
                other => println!("<-- [ENTITY] {:?}", other),
            }
        }
    });
}

/// The shell's short numeric handles for entity ids.
#[derive(Default)]
struct Handles {
    ids: BTreeMap<usize, EntityId>,
    next: usize,
}

impl Handles {
    fn insert(&mut self, id: EntityId) -> usize {
        let handle = self.next;
        self.ids.insert(handle, id);
        self.next += 1;
        handle
    }

    fn resolve(&self, arg: Option<&&str>) -> Result<EntityId> {
        let arg = arg.ok_or_else(|| anyhow!("missing handle"))?;
        let handle: usize = arg
            .parse()
            .map_err(|_| anyhow!("handle must be a number (e.g. '0', '1')"))?;
        self.ids
            .get(&handle)
            .copied()
            .ok_or_else(|| anyhow!("invalid handle #{handle}; use 'list' to see entities"))
    }

    fn handle_of(&self, id: EntityId) -> Option<usize> {
        self.ids.iter().find(|(_, v)| **v == id).map(|(h, _)| *h)
    }
}

fn parse_hhmm(arg: Option<&&str>) -> Result<(u32, u32)> {
    let arg = arg.ok_or_else(|| anyhow!("missing time"))?;
    let (h, m) = arg
        .split_once(':')
        .ok_or_else(|| anyhow!("'{arg}' is not HH:MM"))?;
    Ok((h.parse()?, m.parse()?))
}

fn parse_on_off(arg: Option<&&str>) -> Result<bool> {
    match arg.copied() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => bail!("expected 'on' or 'off'"),
    }
}

fn describe(handle: usize, snapshot: &EntitySnapshot) -> String {
    let status = match snapshot.status() {
        Status::On => "ON ".green().bold(),
        Status::Off => "OFF".red(),
    };
    match snapshot {
        EntitySnapshot::Clock(c) => format!(
            "#{handle:<3} {status} {:<16} on {} off {} [{}]{}{}",
            c.label,
            c.on,
            c.off,
            c.day_names,
            if c.enabled { "" } else { " (disabled)" },
            match (&c.today, c.day_enabled) {
                (Some(today), false) => format!(" (not on {today})"),
                _ => String::new(),
            }
        ),
        EntitySnapshot::Timer(t) => format!(
            "#{handle:<3} {status} {:<16} {}s of {}s{}",
            t.label,
            t.remaining_seconds,
            t.max_seconds,
            if t.timeout { " (timed out)" } else { "" }
        ),
    }
}

/// Builds the entity an `add` command describes.
fn parse_entity(args: &[&str]) -> Result<EntityConfig> {
    let label = args
        .get(2)
        .ok_or_else(|| anyhow!("missing label"))?
        .to_string();
    Ok(match args.get(1).copied() {
        Some("alarm") => {
            let (on_hour, on_minute) = parse_hhmm(args.get(3))?;
            let (off_hour, off_minute) = parse_hhmm(args.get(4))?;
            EntityConfig::Alarm {
                label,
                on_hour,
                on_minute,
                off_hour,
                off_minute,
                days: Default::default(),
            }
        }
        Some("sun") => EntityConfig::Sun {
            label,
            on_offset: args.get(3).map_or(Ok(0), |a| a.parse())?,
            off_offset: args.get(4).map_or(Ok(0), |a| a.parse())?,
            days: Default::default(),
        },
        Some("sunrise") => {
            let (on_hour, on_minute) = parse_hhmm(args.get(3))?;
            EntityConfig::Sunrise {
                label,
                on_hour,
                on_minute,
                off_offset: args.get(4).map_or(Ok(0), |a| a.parse())?,
                days: Default::default(),
            }
        }
        Some("sunset") => {
            let (off_hour, off_minute) = parse_hhmm(args.get(4))?;
            EntityConfig::Sunset {
                label,
                on_offset: args.get(3).map_or(Ok(0), |a| a.parse())?,
                off_hour,
                off_minute,
                days: Default::default(),
            }
        }
        Some("timer") => EntityConfig::Timer {
            label,
            max_seconds: args
                .get(3)
                .ok_or_else(|| anyhow!("missing seconds"))?
                .parse()?,
        },
        _ => bail!("usage: add alarm|sun|sunrise|sunset|timer <LABEL> ..."),
    })
}

async fn add(engine: &AlarmEngine, handles: &mut Handles, args: &[&str]) -> Result<()> {
    let id = engine.add_entity(parse_entity(args)?).await?;
    println!("--> Added entity with handle: #{}", handles.insert(id));
    Ok(())
}

async fn set(engine: &AlarmEngine, id: EntityId, args: &[&str]) -> Result<()> {
    let value = args.get(3).copied().ok_or_else(|| anyhow!("missing value"))?;
    let field = match args.get(2).copied() {
        Some("on_hour") => TimeField::OnHour,
        Some("on_minute") => TimeField::OnMinute,
        Some("off_hour") => TimeField::OffHour,
        Some("off_minute") => TimeField::OffMinute,
        Some("max") => {
            return engine
                .command(id, EntityCommand::SetMaxSeconds(value.parse()?))
                .await
        }
        _ => bail!("unknown field; try on_hour, on_minute, off_hour, off_minute or max"),
    };
    let adjust = match value {
        "+" => Adjust::Increase,
        "-" => Adjust::Decrease,
        n => Adjust::Set(n.parse()?),
    };
    engine.command(id, EntityCommand::Adjust(field, adjust)).await
}

async fn execute(
    engine: &AlarmEngine,
    handles: &mut Handles,
    watching: &AtomicBool,
    args: &[&str],
) -> Result<()> {
    match args[0] {
        "list" => {
            println!("Entities:");
            for (id, snapshot) in engine.list().await {
                let handle = match handles.handle_of(id) {
                    Some(h) => h,
                    None => handles.insert(id),
                };
                println!("  {}", describe(handle, &snapshot));
            }
        }
        "show" => {
            let id = handles.resolve(args.get(1))?;
            let snapshot = engine
                .snapshot(id)
                .await
                .ok_or_else(|| anyhow!("entity is gone"))?;
            println!("{:#?}", snapshot);
        }
        "add" => add(engine, handles, args).await?,
        "remove" => {
            let id = handles.resolve(args.get(1))?;
            if engine.remove_entity(id).await {
                println!("--> Entity successfully removed.");
            } else {
                println!("--> Error: Entity not found in engine.");
            }
            handles.ids.retain(|_, v| *v != id);
        }
        "on" | "off" => {
            let id = handles.resolve(args.get(1))?;
            let status = Status::from(args[0] == "on");
            engine.command(id, EntityCommand::SetStatus(status)).await?;
        }
        "enable" | "disable" => {
            let id = handles.resolve(args.get(1))?;
            let enabled = args[0] == "enable";
            engine.command(id, EntityCommand::SetEnabled(enabled)).await?;
        }
        "day" => {
            let id = handles.resolve(args.get(1))?;
            let day: Weekday = args
                .get(2)
                .ok_or_else(|| anyhow!("missing weekday"))?
                .parse()
                .map_err(|_| anyhow!("not a weekday"))?;
            let enabled = parse_on_off(args.get(3))?;
            engine
                .command(id, EntityCommand::SetDayEnabled(day, enabled))
                .await?;
        }
        "set" => {
            let id = handles.resolve(args.get(1))?;
            set(engine, id, args).await?;
        }
        "start" | "stop" => {
            let id = handles.resolve(args.get(1))?;
            let command = if args[0] == "start" {
                EntityCommand::Start
            } else {
                EntityCommand::Stop
            };
            engine.command(id, command).await?;
        }
        "sun" => {
            let solar = engine.solar();
            solar.recompute();
            match (solar.sunrise(), solar.sunset()) {
                (Some(rise), Some(set)) => println!(
                    "Sunrise {} / sunset {} ({})",
                    rise,
                    set,
                    solar.timezone().name()
                ),
                _ => println!("No sunrise/sunset available for this location today."),
            }
        }
        "watch" => {
            let on = parse_on_off(args.get(1))?;
            watching.store(on, Ordering::Relaxed);
            println!(
                "--> {} listening to entity events.",
                if on { "Started" } else { "Stopped" }
            );
        }
        "help" => print_help(),
        other => println!("Unknown command: '{}'. Type 'help'.", other),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = match env::args().nth(1) {
        Some(path) => AlarmClockConfig::load(path)?,
        None => AlarmClockConfig::default(),
    };
    let engine = AlarmEngine::from_config(config)?;

    let watching = Arc::new(AtomicBool::new(false));
    spawn_event_listeners(&engine, watching.clone());

    info!("Starting {} in the background...", ENGINE_NAME.cyan());
    engine.start().await?;

    let mut handles = Handles::default();
    for (id, _) in engine.list().await {
        handles.insert(id);
    }

    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    println!(
        "{} is running. Type 'help' for commands or 'exit' to quit.",
        ENGINE_NAME.cyan()
    );

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();
                match args.first() {
                    None => {}
                    Some(&"exit") => break,
                    Some(_) => {
                        if let Err(e) = execute(&engine, &mut handles, &watching, &args).await {
                            println!("{} {}", "Error:".red().bold(), e);
                        }
                    }
                }
            }
            Err(_) => break,
        }
    }

    println!("Exiting alarmshell...");
    engine.shutdown().await;
    Ok(())
}

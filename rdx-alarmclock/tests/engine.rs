use alarmclock::components::EntitySnapshot;
use alarmclock::environment::{Location, StaticProvider};
use alarmclock::prelude::*;
use alarmclock::solar::SolarCalculator;
use alarmclock::time::ManualTimeSource;
use chrono::{DateTime, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Sunrise 06:00 and sunset 18:00 UTC, or 08:00 and 16:00 north of 60°.
struct FixedSun;

impl SolarCalculator for FixedSun {
    fn compute(
        &self,
        latitude: f64,
        _longitude: f64,
        date: NaiveDate,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (rise, set) = if latitude > 60.0 { (8, 16) } else { (6, 18) };
        Some((
            Utc.from_utc_datetime(&date.and_hms_opt(rise, 0, 0)?),
            Utc.from_utc_datetime(&date.and_hms_opt(set, 0, 0)?),
        ))
    }
}

struct Harness {
    engine: AlarmEngine,
    provider: Arc<StaticProvider>,
}

fn harness(config: AlarmClockConfig) -> Harness {
    let provider = Arc::new(StaticProvider::new(
        Some("en_GB".into()),
        Some(Tz::UTC),
        Some(Location::new(51.9, 4.5)),
    ));
    let clock = Arc::new(ManualTimeSource::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
    ));
    let engine = AlarmEngine::new(config, provider.clone(), Arc::new(FixedSun), clock).unwrap();
    Harness { engine, provider }
}

/// 2024-01-01 is a Monday.
fn monday(h: u32, m: u32) -> TimeSample {
    TimeSample::from_datetime(&Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap())
}

fn t(h: u32, m: u32) -> TimeSample {
    TimeSample::threshold(h, m).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<EntityEvent>) -> Vec<EntityEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn alarm(label: &str, on: (u32, u32), off: (u32, u32)) -> EntityConfig {
    EntityConfig::Alarm {
        label: label.into(),
        on_hour: on.0,
        on_minute: on.1,
        off_hour: off.0,
        off_minute: off.1,
        days: Default::default(),
    }
}

fn clock_snapshot(snapshot: Option<EntitySnapshot>) -> alarmclock::components::clock::ClockSnapshot {
    match snapshot {
        Some(EntitySnapshot::Clock(c)) => c,
        other => panic!("expected a clock, got {other:?}"),
    }
}

#[tokio::test]
async fn alarm_switches_on_and_off_across_the_day() {
    let h = harness(AlarmClockConfig::default());
    let mut rx = h.engine.subscribe_entity_events();
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    let dispatcher = h.engine.dispatcher();

    dispatcher.process_sample(monday(6, 58));
    dispatcher.process_sample(monday(6, 59));
    assert!(drain(&mut rx).is_empty(), "06:59 is outside [07:00, 22:00)");

    // A delayed tick still catches 07:00.
    dispatcher.process_sample(monday(7, 1));
    let events = drain(&mut rx);
    assert!(events.contains(&EntityEvent::Triggered {
        id,
        status: Status::On
    }));
    assert!(events.contains(&EntityEvent::StatusChanged {
        id,
        status: Status::On,
        cause: Cause::Threshold
    }));

    dispatcher.process_sample(monday(21, 59));
    dispatcher.process_sample(monday(22, 0));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!(snapshot.status, Status::Off);
    assert_eq!(snapshot.now, Some(monday(22, 0)));
}

#[tokio::test]
async fn alarm_added_mid_interval_starts_on_without_triggering() {
    let h = harness(AlarmClockConfig::default());
    let mut rx = h.engine.subscribe_entity_events();
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    let dispatcher = h.engine.dispatcher();

    dispatcher.process_sample(monday(11, 59));
    dispatcher.process_sample(monday(12, 0));
    assert_eq!(
        drain(&mut rx),
        vec![EntityEvent::StatusChanged {
            id,
            status: Status::On,
            cause: Cause::Initial
        }]
    );
}

#[tokio::test]
async fn first_tick_on_the_threshold_triggers() {
    let h = harness(AlarmClockConfig::default());
    let mut rx = h.engine.subscribe_entity_events();
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    let dispatcher = h.engine.dispatcher();

    dispatcher.process_sample(monday(6, 59));
    dispatcher.process_sample(monday(7, 0));
    assert_eq!(
        drain(&mut rx),
        vec![
            EntityEvent::StatusChanged {
                id,
                status: Status::On,
                cause: Cause::Threshold
            },
            EntityEvent::Triggered {
                id,
                status: Status::On
            },
        ]
    );
}

#[tokio::test]
async fn alarm_enabled_later_gets_its_initial_status() {
    let h = harness(AlarmClockConfig::default());
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    h.engine.command(id, EntityCommand::SetEnabled(false)).await.unwrap();

    let dispatcher = h.engine.dispatcher();
    dispatcher.process_sample(monday(11, 59));
    dispatcher.process_sample(monday(12, 0));
    assert_eq!(clock_snapshot(h.engine.snapshot(id).await).status, Status::Off);

    let mut rx = h.engine.subscribe_entity_events();
    h.engine.command(id, EntityCommand::SetEnabled(true)).await.unwrap();
    dispatcher.process_sample(monday(12, 1));
    dispatcher.process_sample(monday(12, 2));
    assert_eq!(clock_snapshot(h.engine.snapshot(id).await).status, Status::On);
    assert!(drain(&mut rx).contains(&EntityEvent::StatusChanged {
        id,
        status: Status::On,
        cause: Cause::Initial
    }));
}

#[tokio::test]
async fn snapshots_name_days_in_the_current_locale() {
    let h = harness(AlarmClockConfig::default());
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    h.engine
        .command(id, EntityCommand::SetDayEnabled(Weekday::Sun, false))
        .await
        .unwrap();
    let dispatcher = h.engine.dispatcher();

    dispatcher.process_sample(monday(11, 59));
    dispatcher.process_sample(monday(12, 0));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!(snapshot.day_names, "Mon, Tue, Wed, Thu, Fri, Sat");
    assert_eq!(snapshot.today.as_deref(), Some("Mon"));

    // Picked up on the next minute.
    h.provider.set_locale(Some("nl_NL.UTF-8".into()));
    dispatcher.process_sample(monday(12, 1));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!(snapshot.day_names, "ma, di, wo, do, vr, za");
    assert_eq!(snapshot.today.as_deref(), Some("ma"));
}

#[tokio::test]
async fn disabled_weekday_suppresses_the_switch() {
    let h = harness(AlarmClockConfig::default());
    let id = h.engine.add_entity(alarm("weekend", (7, 0), (22, 0))).await.unwrap();
    h.engine
        .command(id, EntityCommand::SetDayEnabled(Weekday::Mon, false))
        .await
        .unwrap();

    let dispatcher = h.engine.dispatcher();
    dispatcher.process_sample(monday(6, 58));
    dispatcher.process_sample(monday(6, 59));
    dispatcher.process_sample(monday(7, 0));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!(snapshot.status, Status::Off);
    assert!(!snapshot.day_enabled);
}

#[tokio::test]
async fn adjust_moves_the_threshold() {
    let h = harness(AlarmClockConfig::default());
    let id = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    h.engine
        .command(id, EntityCommand::Adjust(TimeField::OnMinute, Adjust::Set(30)))
        .await
        .unwrap();
    h.engine
        .command(id, EntityCommand::Adjust(TimeField::OffHour, Adjust::Increase))
        .await
        .unwrap();
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!((snapshot.on, snapshot.off), (t(7, 30), t(23, 0)));

    let err = h
        .engine
        .command(id, EntityCommand::Adjust(TimeField::OnHour, Adjust::Set(24)))
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::HourOutOfRange(24)));
}

#[tokio::test]
async fn sun_clock_follows_the_solar_cache() {
    let h = harness(AlarmClockConfig::default());
    let mut system = h.engine.subscribe_system_events();
    let id = h
        .engine
        .add_entity(EntityConfig::Sun {
            label: "garden".into(),
            on_offset: -30,
            off_offset: 15,
            days: Default::default(),
        })
        .await
        .unwrap();

    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!((snapshot.on, snapshot.off), (t(17, 30), t(6, 15)));

    // Thresholds wrap past midnight, so 23:00 starts ON.
    let dispatcher = h.engine.dispatcher();
    dispatcher.process_sample(monday(22, 59));
    dispatcher.process_sample(monday(23, 0));
    assert_eq!(clock_snapshot(h.engine.snapshot(id).await).status, Status::On);

    // Moving far north takes effect on the next hour tick.
    h.provider.set_location(Some(Location::new(70.0, 20.0)));
    dispatcher.process_sample(monday(23, 59));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!((snapshot.on, snapshot.off), (t(17, 30), t(6, 15)));

    dispatcher.process_sample(TimeSample::from_datetime(
        &Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    ));
    let snapshot = clock_snapshot(h.engine.snapshot(id).await);
    assert_eq!((snapshot.on, snapshot.off), (t(15, 30), t(8, 15)));

    let updates = std::iter::from_fn(|| system.try_recv().ok())
        .filter(|e| matches!(e, SystemEvent::SolarUpdated { .. }))
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn removing_entities_releases_their_subscriptions() {
    let h = harness(AlarmClockConfig::default());
    let bus = h.engine.dispatcher().bus();
    // The dispatcher's own locale refresher.
    assert_eq!(bus.subscriber_count(ClockEvent::MinuteTick), 1);

    let a = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    let s = h
        .engine
        .add_entity(EntityConfig::Sunrise {
            label: "blinds".into(),
            on_hour: 5,
            on_minute: 0,
            off_offset: 0,
            days: Default::default(),
        })
        .await
        .unwrap();
    assert_eq!(bus.subscriber_count(ClockEvent::MinuteTick), 3);
    assert_eq!(bus.subscriber_count(ClockEvent::HourTick), 1);

    assert!(h.engine.remove_entity(a).await);
    assert!(h.engine.remove_entity(s).await);
    assert!(!h.engine.remove_entity(s).await);
    assert_eq!(bus.subscriber_count(ClockEvent::MinuteTick), 1);
    assert_eq!(bus.subscriber_count(ClockEvent::HourTick), 0);
    assert!(h.engine.list().await.is_empty());
}

#[tokio::test]
async fn invalid_entity_is_rejected_before_registration() {
    let h = harness(AlarmClockConfig::default());
    let err = h
        .engine
        .add_entity(alarm("bad", (24, 0), (22, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::HourOutOfRange(24)));
    assert!(h.engine.list().await.is_empty());
    assert_eq!(h.engine.dispatcher().bus().subscriber_count(ClockEvent::MinuteTick), 1);
}

#[tokio::test]
async fn commands_outside_an_entity_kind_are_unsupported() {
    let h = harness(AlarmClockConfig::default());
    let timer = h
        .engine
        .add_entity(EntityConfig::Timer {
            label: "tea".into(),
            max_seconds: 60,
        })
        .await
        .unwrap();
    let err = h
        .engine
        .command(timer, EntityCommand::SetEnabled(false))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::Unsupported {
            command: "set_enabled",
            kind: "timer"
        })
    );

    let alarm = h.engine.add_entity(alarm("porch", (7, 0), (22, 0))).await.unwrap();
    assert!(h.engine.command(alarm, EntityCommand::Start).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn timer_times_out_through_the_engine() {
    let h = harness(AlarmClockConfig::default());
    let mut rx = h.engine.subscribe_entity_events();
    let id = h
        .engine
        .add_entity(EntityConfig::Timer {
            label: "tea".into(),
            max_seconds: 3,
        })
        .await
        .unwrap();
    h.engine.command(id, EntityCommand::Start).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    match h.engine.snapshot(id).await {
        Some(EntitySnapshot::Timer(t)) => {
            assert_eq!(t.status, Status::Off);
            assert!(t.timeout);
            assert_eq!(t.remaining_seconds, 0);
        }
        other => panic!("expected a timer, got {other:?}"),
    }
    let events = drain(&mut rx);
    assert!(events.contains(&EntityEvent::TimedOut { id }));
    assert!(events.contains(&EntityEvent::Triggered {
        id,
        status: Status::Off
    }));
}

#[tokio::test(start_paused = true)]
async fn start_builds_configured_entities_and_shutdown_clears_them() {
    let config = AlarmClockConfig {
        entities: vec![alarm("porch", (7, 0), (22, 0))],
        ..Default::default()
    };
    let h = harness(config);
    h.engine.start().await.unwrap();
    h.engine.start().await.unwrap();
    assert!(h.engine.dispatcher().is_running());
    assert_eq!(h.engine.list().await.len(), 1);

    h.engine.shutdown().await;
    assert!(!h.engine.dispatcher().is_running());
    assert!(h.engine.list().await.is_empty());
}

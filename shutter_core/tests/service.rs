//! Threaded service behavior with short real travel times.

use std::sync::Arc;
use std::time::Duration;

use shutter_config::{Config, LinkCfg, Logging, Role, ServiceCfg, ShutterCfg, SwitchCfg};
use shutter_core::mocks::{MemoryStore, RecordingLink};
use shutter_core::{
    Command, Intent, Motion, Position, PositionRecord, RawSwitchEvent, ShutterId, ShutterService,
    SwitchAction,
};
use shutter_traits::MonotonicClock;

fn shutter(id: &str, channel: &str) -> ShutterCfg {
    ShutterCfg {
        id: id.to_string(),
        channel: channel.to_string(),
        open_secs: 0.4,
        close_secs: 0.4,
    }
}

fn config() -> Config {
    Config {
        service: ServiceCfg {
            long_press_ms: 300,
            endpoint_margin_ms: 50,
            ..ServiceCfg::default()
        },
        logging: Logging::default(),
        link: LinkCfg::default(),
        shutters: vec![shutter("living", "volet1"), shutter("bedroom", "volet2")],
        switches: vec![SwitchCfg {
            id: "dev:up".to_string(),
            shutters: vec!["living".to_string()],
            role: Role::Up,
            preset: Some(50.0),
        }],
    }
}

fn record(id: &str, percent: f32) -> PositionRecord {
    PositionRecord {
        shutter_id: id.to_string(),
        estimated_position: Some(percent),
        last_calibrated_unix: None,
    }
}

fn start(seed: Vec<PositionRecord>) -> (ShutterService, RecordingLink, MemoryStore) {
    let link = RecordingLink::new(Arc::new(MonotonicClock::new()));
    let store = MemoryStore::seeded(seed);
    let service = ShutterService::start(
        &config(),
        link.clone(),
        Box::new(store.clone()),
        Arc::new(MonotonicClock::new()),
    )
    .expect("service start");
    (service, link, store)
}

fn pressed(switch: &str) -> RawSwitchEvent {
    RawSwitchEvent {
        switch: switch.to_string(),
        action: SwitchAction::Pressed,
        hold_ms: None,
        battery_percent: None,
    }
}

#[test]
fn timed_move_is_stopped_at_the_deadline() {
    let (service, link, store) = start(vec![record("living", 0.0)]);
    let living = ShutterId::from("living");

    service.submit(&living, Intent::GotoPercent(50.0)).unwrap();
    // half of the 400ms open travel plus scheduling slack
    std::thread::sleep(Duration::from_millis(350));

    assert_eq!(
        link.commands_for("volet1"),
        vec![Command::Open, Command::Stop]
    );
    let snap = service.read(&living).expect("snapshot");
    assert_eq!(snap.motion, Motion::Idle);
    assert_eq!(snap.position, Position::At(50.0));
    assert!(snap.target.is_none());

    // the settle flushed state
    assert!(store.save_count() >= 1);
    let saved = store.last_save().expect("a save happened");
    let living_rec = saved.iter().find(|r| r.shutter_id == "living").unwrap();
    assert_eq!(living_rec.estimated_position, Some(50.0));

    service.shutdown().unwrap();
}

#[test]
fn user_stop_cancels_the_scheduled_stop() {
    let (service, link, _store) = start(vec![record("living", 0.0)]);
    let living = ShutterId::from("living");

    service.submit(&living, Intent::GotoPercent(50.0)).unwrap();
    std::thread::sleep(Duration::from_millis(60));
    service.submit(&living, Intent::Stop).unwrap();

    // wait well past the original 200ms deadline
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        link.commands_for("volet1"),
        vec![Command::Open, Command::Stop]
    );
    let snap = service.read(&living).expect("snapshot");
    assert_eq!(snap.motion, Motion::Idle);
    assert!(snap.target.is_none());
    match snap.position {
        Position::At(p) => assert!(
            (5.0..=45.0).contains(&p),
            "interrupted estimate out of range: {p}"
        ),
        Position::Unknown => panic!("position lost"),
    }

    service.shutdown().unwrap();
}

#[test]
fn shutters_move_independently() {
    let (service, link, _store) = start(vec![record("living", 0.0)]);
    let living = ShutterId::from("living");
    let bedroom = ShutterId::from("bedroom");

    service.submit(&living, Intent::GotoPercent(50.0)).unwrap();
    service.submit(&bedroom, Intent::MoveDown).unwrap();
    std::thread::sleep(Duration::from_millis(350));

    // living completed its timed run while bedroom keeps running untimed
    assert_eq!(
        link.commands_for("volet1"),
        vec![Command::Open, Command::Stop]
    );
    assert_eq!(link.commands_for("volet2"), vec![Command::Close]);
    assert_eq!(service.read(&bedroom).unwrap().motion, Motion::Closing);

    service.shutdown().unwrap();
}

#[test]
fn calibration_required_disables_one_shutter_not_the_service() {
    // bedroom has no persisted record, so its position is unknown
    let (service, link, _store) = start(vec![record("living", 0.0)]);
    let bedroom = ShutterId::from("bedroom");

    service.submit(&bedroom, Intent::GotoPercent(50.0)).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(link.commands_for("volet2").is_empty());
    assert_eq!(service.read(&bedroom).unwrap().position, Position::Unknown);

    // plain directional moves still work
    service.submit(&bedroom, Intent::MoveDown).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(link.commands_for("volet2"), vec![Command::Close]);

    service.shutdown().unwrap();
}

#[test]
fn switch_events_are_routed_through_bindings() {
    let (service, link, _store) = start(vec![record("living", 0.0)]);

    service.handle_event(&pressed("dev:up"));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(link.commands_for("volet1"), vec![Command::Open]);

    // pressing again while opening toggles to stop
    service.handle_event(&pressed("dev:up"));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        link.commands_for("volet1"),
        vec![Command::Open, Command::Stop]
    );

    service.shutdown().unwrap();
}

#[test]
fn unmapped_events_mutate_nothing() {
    let (service, link, _store) = start(vec![record("living", 42.0)]);

    service.handle_event(&pressed("stranger:button"));
    std::thread::sleep(Duration::from_millis(80));

    assert!(link.commands().is_empty());
    let snap = service.read(&ShutterId::from("living")).unwrap();
    assert_eq!(snap.position, Position::At(42.0));
    assert_eq!(snap.motion, Motion::Idle);

    service.shutdown().unwrap();
}

#[test]
fn long_release_drives_to_the_bound_preset() {
    let (service, link, _store) = start(vec![record("living", 0.0)]);

    service.handle_event(&RawSwitchEvent {
        switch: "dev:up".to_string(),
        action: SwitchAction::Released,
        hold_ms: Some(800),
        battery_percent: None,
    });
    std::thread::sleep(Duration::from_millis(350));

    assert_eq!(
        link.commands_for("volet1"),
        vec![Command::Open, Command::Stop]
    );
    assert_eq!(
        service.read(&ShutterId::from("living")).unwrap().position,
        Position::At(50.0)
    );

    service.shutdown().unwrap();
}

#[test]
fn shutdown_flushes_the_latest_estimates() {
    let (service, _link, store) = start(vec![record("living", 70.0)]);
    let living = ShutterId::from("living");

    service.submit(&living, Intent::GotoPercent(50.0)).unwrap();
    std::thread::sleep(Duration::from_millis(350));
    let before = store.save_count();

    service.shutdown().unwrap();
    // the persistence worker writes once more on its way out
    assert!(store.save_count() > before);
    let saved = store.last_save().unwrap();
    let living_rec = saved.iter().find(|r| r.shutter_id == "living").unwrap();
    assert_eq!(living_rec.estimated_position, Some(50.0));
}

#[test]
fn submit_to_unknown_shutter_errors() {
    let (service, _link, _store) = start(Vec::new());
    let err = service
        .submit(&ShutterId::from("ghost"), Intent::Stop)
        .unwrap_err();
    assert!(err.to_string().contains("unknown shutter"), "got: {err}");
    service.shutdown().unwrap();
}

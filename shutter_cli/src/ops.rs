//! Subcommand bodies: service loop, one-shot drive, status.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use shutter_config::Config;
use shutter_core::{
    Intent, JsonStateStore, Motion, Position, RawSwitchEvent, ShutterId, ShutterService,
    StateStore,
};
use shutter_traits::{MonotonicClock, MotorLink};

use crate::cli::DriveTarget;

fn start_service<L>(cfg: &Config, link: L) -> eyre::Result<ShutterService>
where
    L: MotorLink + Clone + Send + 'static,
{
    let store = Box::new(JsonStateStore::new(&cfg.service.state_file));
    ShutterService::start(cfg, link, store, Arc::new(MonotonicClock::new()))
        .wrap_err("starting shutter service")
}

/// Service mode: consume receiver events until the stream ends or a signal
/// asks us to stop; either way state is flushed before returning.
pub fn run_service<L>(cfg: &Config, link: L, stop: Arc<AtomicBool>) -> eyre::Result<()>
where
    L: MotorLink + Clone + Send + 'static,
{
    let service = start_service(cfg, link)?;

    // a reader thread feeds lines through a channel so the main loop can
    // keep watching the shutdown flag while stdin is quiet
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("event-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .wrap_err("spawning event reader")?;

    tracing::info!("listening for switch events on stdin");
    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawSwitchEvent>(line) {
                    Ok(event) => service.handle_event(&event),
                    Err(e) => tracing::warn!(error = %e, "unparseable event line"),
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::info!("event stream ended");
                break;
            }
        }
    }

    service.shutdown()
}

/// One-shot operation for calibration tuning. Directional moves on an
/// uncalibrated shutter are held for the full travel time and then stopped,
/// which doubles as the recalibration gesture.
pub fn drive_once<L>(
    cfg: &Config,
    link: L,
    shutter: &str,
    target: DriveTarget,
) -> eyre::Result<()>
where
    L: MotorLink + Clone + Send + 'static,
{
    let shutter_cfg = cfg
        .shutters
        .iter()
        .find(|s| s.id == shutter)
        .ok_or_else(|| eyre::eyre!("unknown shutter: {shutter}"))?;

    let service = start_service(cfg, link)?;
    let id = ShutterId::from(shutter);
    let position_known = service
        .read(&id)
        .map(|s| s.position.is_known())
        .unwrap_or(false);

    // with a known position an endpoint request can be a timed goto; an
    // unknown one needs the untimed full run
    let intent = match target {
        DriveTarget::Stop => Intent::Stop,
        DriveTarget::Percent(p) => Intent::GotoPercent(p),
        DriveTarget::Open if position_known => Intent::GotoPercent(100.0),
        DriveTarget::Close if position_known => Intent::GotoPercent(0.0),
        DriveTarget::Open => Intent::MoveUp,
        DriveTarget::Close => Intent::MoveDown,
    };
    service.submit(&id, intent)?;

    match intent {
        Intent::MoveUp | Intent::MoveDown => {
            let full = if matches!(intent, Intent::MoveUp) {
                shutter_cfg.open_duration()
            } else {
                shutter_cfg.close_duration()
            };
            let margin = Duration::from_millis(cfg.service.endpoint_margin_ms);
            tracing::info!(
                shutter,
                run_ms = (full + margin).as_millis() as u64,
                "holding until the mechanical stop"
            );
            std::thread::sleep(full + margin);
            service.submit(&id, Intent::Stop)?;
            std::thread::sleep(Duration::from_millis(100));
        }
        Intent::GotoPercent(_) => {
            let ceiling = shutter_cfg.open_duration().max(shutter_cfg.close_duration())
                + Duration::from_millis(cfg.service.endpoint_margin_ms)
                + Duration::from_secs(2);
            wait_for_idle(&service, &id, ceiling);
        }
        Intent::Stop => std::thread::sleep(Duration::from_millis(100)),
    }

    if let Some(snap) = service.read(&id) {
        println!("{} {}", snap.id, describe_position(snap.position));
    }
    service.shutdown()
}

fn wait_for_idle(service: &ShutterService, id: &ShutterId, ceiling: Duration) {
    let started = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(100));
        match service.read(id) {
            Some(snap) if snap.motion == Motion::Idle => break,
            Some(_) => {}
            None => break,
        }
        if started.elapsed() > ceiling {
            tracing::warn!(shutter = %id, "movement did not settle within the expected time");
            break;
        }
    }
}

fn describe_position(position: Position) -> String {
    match position {
        Position::At(p) => format!("{p:.1}% open"),
        Position::Unknown => "unknown (needs a full open or close run)".to_string(),
    }
}

/// Print the persisted estimate for every configured shutter.
pub fn print_status(cfg: &Config) -> eyre::Result<()> {
    let mut store = JsonStateStore::new(&cfg.service.state_file);
    let records = match store.load() {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "state file unreadable; reporting unknown");
            Vec::new()
        }
    };

    for shutter in &cfg.shutters {
        let record = records.iter().find(|r| r.shutter_id == shutter.id);
        let position = record
            .and_then(|r| r.estimated_position)
            .map(Position::At)
            .unwrap_or(Position::Unknown);
        let calibrated = record
            .and_then(|r| r.last_calibrated_unix)
            .map(|s| format!("calibrated@{s}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<40} {}",
            shutter.id,
            describe_position(position),
            calibrated
        );
    }
    Ok(())
}

//! Command gateway implementations for the legacy shutter-motor controller.
//!
//! The controller is reached through a helper binary that owns the serial
//! port (`shuttercmd <verb> <channel>`); this crate wraps it behind
//! `shutter_traits::MotorLink` and adds the pacing the serial bus needs.

pub mod error;

use std::process::Command as ProcessCommand;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use shutter_traits::MotorLink;

use crate::error::LinkError;

/// Legacy controller verbs: the firmware speaks on/off/pause, not
/// open/close/stop.
fn wire_verb(verb: Verb) -> &'static str {
    match verb {
        Verb::Open => "on",
        Verb::Close => "off",
        Verb::Stop => "pause",
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Open,
    Close,
    Stop,
}

/// Bridge to the helper binary driving the serial bus.
///
/// Commands are paced: the controller silently drops commands that arrive
/// back to back, so consecutive sends are separated by at least `send_gap`.
pub struct ShutterCmdLink {
    command: String,
    send_gap: Duration,
    last_sent: Option<Instant>,
}

impl ShutterCmdLink {
    pub fn new(command: impl Into<String>, send_gap: Duration) -> Self {
        Self {
            command: command.into(),
            send_gap,
            last_sent: None,
        }
    }

    fn pace(&mut self) {
        if let Some(prev) = self.last_sent {
            let since = prev.elapsed();
            if since < self.send_gap {
                thread::sleep(self.send_gap - since);
            }
        }
    }

    fn run(&mut self, verb: Verb, channel: &str) -> error::Result<()> {
        self.pace();
        let wire = wire_verb(verb);
        tracing::debug!(command = %self.command, verb = wire, channel, "sending shutter command");
        let status = ProcessCommand::new(&self.command)
            .arg(wire)
            .arg(channel)
            .status()
            .map_err(|source| LinkError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        self.last_sent = Some(Instant::now());
        if !status.success() {
            return Err(LinkError::Failed {
                command: self.command.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl MotorLink for ShutterCmdLink {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run(Verb::Open, channel).map_err(Into::into)
    }
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run(Verb::Close, channel).map_err(Into::into)
    }
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run(Verb::Stop, channel).map_err(Into::into)
    }
}

/// Development link: logs commands instead of touching the serial bus.
#[derive(Debug, Default, Clone)]
pub struct SimulatedLink;

impl SimulatedLink {
    pub fn new() -> Self {
        Self
    }
}

impl MotorLink for SimulatedLink {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(channel, "open (simulated)");
        Ok(())
    }
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(channel, "close (simulated)");
        Ok(())
    }
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(channel, "stop (simulated)");
        Ok(())
    }
}

/// Shares one underlying link between the per-shutter workers; the serial
/// bus takes one command at a time.
pub struct SharedLink<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedLink<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: MotorLink> SharedLink<L> {
    pub fn new(link: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(link)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl<L: MotorLink> MotorLink for SharedLink<L> {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.with(|link| link.open(channel))
    }
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.with(|link| link.close(channel))
    }
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.with(|link| link.stop(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn simulated_link_accepts_all_verbs() {
        let mut link = SimulatedLink::new();
        assert!(link.open("volet1").is_ok());
        assert!(link.close("volet1").is_ok());
        assert!(link.stop("volet1").is_ok());
    }

    #[test]
    fn shared_link_clones_drive_the_same_inner() {
        let mut a = SharedLink::new(SimulatedLink::new());
        let mut b = a.clone();
        assert!(a.open("volet1").is_ok());
        assert!(b.stop("volet1").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn consecutive_sends_are_paced() {
        let mut link = ShutterCmdLink::new("true", Duration::from_millis(50));
        let started = Instant::now();
        link.stop("volet1").expect("first send");
        link.stop("volet1").expect("second send");
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[cfg(unix)]
    #[rstest]
    #[case("false")]
    #[case("/nonexistent/shuttercmd")]
    fn failures_surface_as_errors(#[case] command: &str) {
        let mut link = ShutterCmdLink::new(command, Duration::ZERO);
        assert!(link.open("volet1").is_err());
    }
}

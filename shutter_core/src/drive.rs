//! Per-shutter movement state machine.
//!
//! Translates intents into serial commands and computes the deadline at
//! which a timed movement must be stopped. The drive is synchronous and
//! clock-injected; the worker in `service` owns the actual deadline wait.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use shutter_traits::{Clock, MotorLink};

use crate::error::{ControlError, Result};
use crate::intent::Intent;
use crate::model::lock_state;
use crate::position::{Direction, Motion, Position, ShutterId, ShutterState};

/// Wire command understood by the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    Stop,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Close => "close",
            Command::Stop => "stop",
        }
    }
}

impl Direction {
    fn command(self) -> Command {
        match self {
            Direction::Open => Command::Open,
            Direction::Close => Command::Close,
        }
    }
}

/// Outcome of applying an intent, telling the worker what to wait for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveStatus {
    /// Shutter settled; any armed deadline is void.
    Idle,
    /// Shutter moving. `deadline` is the instant the scheduled stop must
    /// fire; `None` for untimed runs toward a natural endpoint.
    Moving { deadline: Option<Instant> },
    /// Nothing changed; keep the current deadline, if any.
    Unchanged,
}

pub struct ShutterDrive<L: MotorLink> {
    id: ShutterId,
    channel: String,
    link: L,
    state: Arc<Mutex<ShutterState>>,
    clock: Arc<dyn Clock + Send + Sync>,
    /// Extra run time granted to endpoint-target moves so the motor reliably
    /// reaches its mechanical stop.
    endpoint_margin: Duration,
}

/// Targets at the travel limits settle against the mechanical stop instead
/// of a timed serial stop.
fn is_endpoint(target: f32) -> bool {
    target <= 0.0 || target >= 100.0
}

/// Interior targets closer than this to the current estimate are not worth
/// a movement; the motor spin-up alone exceeds the travel.
const MIN_DELTA_PERCENT: f32 = 0.5;

impl<L: MotorLink> ShutterDrive<L> {
    pub fn new(
        id: ShutterId,
        channel: impl Into<String>,
        link: L,
        state: Arc<Mutex<ShutterState>>,
        clock: Arc<dyn Clock + Send + Sync>,
        endpoint_margin: Duration,
    ) -> Self {
        Self {
            id,
            channel: channel.into(),
            link,
            state,
            clock,
            endpoint_margin,
        }
    }

    pub fn id(&self) -> &ShutterId {
        &self.id
    }

    /// Apply one intent. On a command failure the logical state is left
    /// untouched (the command never reached the motor), so a retry or a
    /// manual stop remains safe.
    pub fn apply(&mut self, intent: Intent) -> Result<DriveStatus> {
        match intent {
            Intent::Stop => self.stop_now(),
            Intent::MoveUp => self.run_toward(Direction::Open),
            Intent::MoveDown => self.run_toward(Direction::Close),
            Intent::GotoPercent(p) => self.goto_percent(p),
        }
    }

    /// The armed deadline elapsed: enforce the scheduled stop and land on
    /// the target. Interior targets get a serial stop; endpoint targets ran
    /// into the mechanical stop already and must not be cut short.
    pub fn on_deadline(&mut self) -> Result<DriveStatus> {
        let mut st = lock_state(&self.state);
        if st.motion == Motion::Idle {
            // stale wake-up after an interrupting stop; nothing to do
            return Ok(DriveStatus::Idle);
        }
        let Some(target) = st.target else {
            return Ok(DriveStatus::Unchanged);
        };
        if !is_endpoint(target) {
            dispatch(&mut self.link, &self.id, &self.channel, Command::Stop)?;
        }
        st.settle_on_target();
        tracing::info!(
            shutter = %self.id,
            position = target,
            endpoint = is_endpoint(target),
            "movement completed"
        );
        Ok(DriveStatus::Idle)
    }

    fn stop_now(&mut self) -> Result<DriveStatus> {
        let mut st = lock_state(&self.state);
        if st.motion == Motion::Idle {
            tracing::debug!(shutter = %self.id, "stop while idle ignored");
            return Ok(DriveStatus::Idle);
        }
        dispatch(&mut self.link, &self.id, &self.channel, Command::Stop)?;
        let settled = st.settle_from_elapsed(self.clock.now());
        tracing::info!(shutter = %self.id, position = ?settled, "stopped by request");
        Ok(DriveStatus::Idle)
    }

    fn run_toward(&mut self, dir: Direction) -> Result<DriveStatus> {
        let mut st = lock_state(&self.state);
        if st.motion.direction() == Some(dir) {
            tracing::debug!(shutter = %self.id, direction = ?dir, "already running that way");
            return Ok(DriveStatus::Unchanged);
        }
        if st.motion != Motion::Idle {
            // never reverse without an intervening stop: the elapsed-time
            // accounting is unreliable across a hard direction flip
            dispatch(&mut self.link, &self.id, &self.channel, Command::Stop)?;
            st.settle_from_elapsed(self.clock.now());
        }
        dispatch(&mut self.link, &self.id, &self.channel, dir.command())?;
        st.begin_move(dir, self.clock.now(), None);
        tracing::info!(shutter = %self.id, direction = ?dir, "movement started");
        Ok(DriveStatus::Moving { deadline: None })
    }

    fn goto_percent(&mut self, target: f32) -> Result<DriveStatus> {
        let target = if target.is_finite() {
            target.clamp(0.0, 100.0)
        } else {
            tracing::debug!(shutter = %self.id, "ignoring non-finite target");
            return Ok(DriveStatus::Unchanged);
        };
        let mut st = lock_state(&self.state);
        if st.motion != Motion::Idle {
            // interrupt the in-flight movement first, then aim from the
            // recomputed estimate
            dispatch(&mut self.link, &self.id, &self.channel, Command::Stop)?;
            st.settle_from_elapsed(self.clock.now());
        }
        let Position::At(current) = st.position else {
            return Err(eyre::Report::new(ControlError::CalibrationRequired {
                shutter: self.id.as_str().to_string(),
            }));
        };

        let delta = target - current;
        let endpoint = is_endpoint(target);
        if delta.abs() < MIN_DELTA_PERCENT && !endpoint {
            tracing::debug!(shutter = %self.id, target, "already at requested position");
            return Ok(DriveStatus::Idle);
        }

        // re-sending the endpoint command when already there does not hurt
        // and refreshes the calibration against the mechanical stop
        let dir = if delta > 0.0 {
            Direction::Open
        } else if delta < 0.0 {
            Direction::Close
        } else if target >= 100.0 {
            Direction::Open
        } else {
            Direction::Close
        };

        let mut run_for = st.travel.time_for(delta.abs(), dir);
        if endpoint {
            run_for += self.endpoint_margin;
        }
        dispatch(&mut self.link, &self.id, &self.channel, dir.command())?;
        let now = self.clock.now();
        st.begin_move(dir, now, Some(target));
        tracing::info!(
            shutter = %self.id,
            from = current,
            target,
            run_ms = run_for.as_millis() as u64,
            "timed movement started"
        );
        Ok(DriveStatus::Moving {
            deadline: Some(now + run_for),
        })
    }
}

/// Issue one command, mapping transport failures to `CommandFailed`. Free
/// function so callers can hold the state lock while commanding.
fn dispatch<L: MotorLink>(
    link: &mut L,
    id: &ShutterId,
    channel: &str,
    command: Command,
) -> Result<()> {
    let outcome = match command {
        Command::Open => link.open(channel),
        Command::Close => link.close(channel),
        Command::Stop => link.stop(channel),
    };
    outcome.map_err(|e| {
        eyre::Report::new(ControlError::CommandFailed {
            shutter: id.as_str().to_string(),
            command: command.name(),
            reason: e.to_string(),
        })
    })
}

//! Per-shutter position estimation.
//!
//! There is no position feedback from the motors: the only observable is
//! how long a shutter has been moving relative to its calibrated full-travel
//! times. The estimate is exact right after a run into a mechanical endpoint
//! and degrades with every interrupted partial movement in between.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

/// Logical shutter identifier, matching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShutterId(String);

impl ShutterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShutterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShutterId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ShutterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Calibrated full-travel durations. Motors are not symmetric: gravity makes
/// closing faster than opening on most installations.
#[derive(Debug, Clone, Copy)]
pub struct Travel {
    pub full_open: Duration,
    pub full_close: Duration,
}

impl Travel {
    pub fn for_direction(&self, dir: Direction) -> Duration {
        match dir {
            Direction::Open => self.full_open,
            Direction::Close => self.full_close,
        }
    }

    /// Run time needed to travel `delta_percent` of the height in `dir`.
    pub fn time_for(&self, delta_percent: f32, dir: Direction) -> Duration {
        let fraction = (delta_percent / 100.0).clamp(0.0, 1.0);
        self.for_direction(dir).mul_f32(fraction)
    }
}

/// Which way the motor is being driven. Open raises the shutter (position
/// grows toward 100), close lowers it (position shrinks toward 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    /// Position reached when a run in this direction hits the mechanical stop.
    pub fn endpoint(self) -> f32 {
        match self {
            Direction::Open => 100.0,
            Direction::Close => 0.0,
        }
    }
}

/// Estimated height. `Unknown` until a full endpoint run completes once;
/// percent is 0 = fully closed, 100 = fully open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Position {
    Unknown,
    At(f32),
}

impl Position {
    pub fn percent(self) -> Option<f32> {
        match self {
            Position::Unknown => None,
            Position::At(p) => Some(p),
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Position::At(_))
    }

    fn is_endpoint(self) -> bool {
        matches!(self, Position::At(p) if p <= 0.0 || p >= 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Idle,
    Opening,
    Closing,
}

impl Motion {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Motion::Idle => None,
            Motion::Opening => Some(Direction::Open),
            Motion::Closing => Some(Direction::Close),
        }
    }

    pub fn running(dir: Direction) -> Self {
        match dir {
            Direction::Open => Motion::Opening,
            Direction::Close => Motion::Closing,
        }
    }
}

/// One Position Model entry. Mutated exclusively by the movement scheduler;
/// everything else observes snapshots.
#[derive(Debug, Clone)]
pub struct ShutterState {
    pub position: Position,
    pub motion: Motion,
    /// Valid only while `motion != Idle`.
    pub move_started: Option<Instant>,
    /// Set only for percent-targeted moves; cleared the moment a stop lands.
    pub target: Option<f32>,
    pub travel: Travel,
    /// Wall-clock stamp of the last endpoint run.
    pub last_calibrated: Option<SystemTime>,
}

impl ShutterState {
    pub fn new(travel: Travel) -> Self {
        Self {
            position: Position::Unknown,
            motion: Motion::Idle,
            move_started: None,
            target: None,
            travel,
            last_calibrated: None,
        }
    }

    /// Seed from a persisted record. Out-of-range or non-finite positions are
    /// not trusted and degrade to `Unknown`.
    pub fn seeded(travel: Travel, percent: Option<f32>, last_calibrated: Option<SystemTime>) -> Self {
        let position = match percent {
            Some(p) if p.is_finite() && (0.0..=100.0).contains(&p) => Position::At(p),
            Some(p) => {
                tracing::warn!(percent = p, "ignoring implausible persisted position");
                Position::Unknown
            }
            None => Position::Unknown,
        };
        Self {
            position,
            last_calibrated,
            ..Self::new(travel)
        }
    }

    /// Position as observable right now. While moving this is a projection of
    /// the last settled estimate, not ground truth.
    pub fn projected(&self, now: Instant) -> Position {
        match (self.motion.direction(), self.move_started, self.position) {
            (Some(dir), Some(started), Position::At(p)) => {
                let elapsed = now.saturating_duration_since(started);
                Position::At(travel_from(p, dir, elapsed, &self.travel))
            }
            _ => self.position,
        }
    }

    /// Record the start of a movement.
    pub(crate) fn begin_move(&mut self, dir: Direction, now: Instant, target: Option<f32>) {
        self.motion = Motion::running(dir);
        self.move_started = Some(now);
        self.target = target;
    }

    /// Settle after an interrupting stop: fold the elapsed run time into the
    /// estimate. A clamp onto an endpoint counts as a calibration event (the
    /// motor ran into its mechanical stop). From `Unknown`, only a run held
    /// past the full travel time recalibrates.
    pub(crate) fn settle_from_elapsed(&mut self, now: Instant) -> Position {
        if let (Some(dir), Some(started)) = (self.motion.direction(), self.move_started) {
            let elapsed = now.saturating_duration_since(started);
            self.position = match self.position {
                Position::At(p) => Position::At(travel_from(p, dir, elapsed, &self.travel)),
                Position::Unknown => {
                    if elapsed >= self.travel.for_direction(dir) {
                        Position::At(dir.endpoint())
                    } else {
                        Position::Unknown
                    }
                }
            };
            if self.position.is_endpoint() {
                self.last_calibrated = Some(SystemTime::now());
            }
        }
        self.motion = Motion::Idle;
        self.move_started = None;
        self.target = None;
        self.position
    }

    /// Deadline-completed move: land exactly on the recorded target. Accurate
    /// by construction, the run time was computed from this very target.
    pub(crate) fn settle_on_target(&mut self) {
        if let Some(t) = self.target.take() {
            self.position = Position::At(t);
            if self.position.is_endpoint() {
                self.last_calibrated = Some(SystemTime::now());
            }
        }
        self.motion = Motion::Idle;
        self.move_started = None;
    }
}

/// Estimate after running from `p` in `dir` for `elapsed`, clamped to the
/// travel range.
fn travel_from(p: f32, dir: Direction, elapsed: Duration, travel: &Travel) -> f32 {
    let full = travel.for_direction(dir);
    let delta = if full.is_zero() {
        100.0
    } else {
        elapsed.as_secs_f32() / full.as_secs_f32() * 100.0
    };
    match dir {
        Direction::Open => (p + delta).min(100.0),
        Direction::Close => (p - delta).max(0.0),
    }
}

/// Read-only view for diagnostics and status queries.
#[derive(Debug, Clone)]
pub struct ShutterSnapshot {
    pub id: ShutterId,
    pub position: Position,
    pub motion: Motion,
    pub target: Option<f32>,
    pub last_calibrated: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn travel() -> Travel {
        Travel {
            full_open: Duration::from_secs(20),
            full_close: Duration::from_secs(18),
        }
    }

    #[test]
    fn projection_scales_with_elapsed_time() {
        let mut st = ShutterState::seeded(travel(), Some(0.0), None);
        let t0 = Instant::now();
        st.begin_move(Direction::Open, t0, None);
        let p = st.projected(t0 + Duration::from_secs(5));
        assert_eq!(p, Position::At(25.0));
    }

    #[test]
    fn projection_clamps_at_endpoints() {
        let mut st = ShutterState::seeded(travel(), Some(90.0), None);
        let t0 = Instant::now();
        st.begin_move(Direction::Open, t0, None);
        assert_eq!(st.projected(t0 + Duration::from_secs(60)), Position::At(100.0));
    }

    #[test]
    fn settle_folds_elapsed_into_estimate() {
        let mut st = ShutterState::seeded(travel(), Some(50.0), None);
        let t0 = Instant::now();
        st.begin_move(Direction::Close, t0, None);
        let settled = st.settle_from_elapsed(t0 + Duration::from_secs(9));
        assert_eq!(settled, Position::At(0.0));
        assert_eq!(st.motion, Motion::Idle);
        assert!(st.last_calibrated.is_some());
    }

    #[test]
    fn unknown_stays_unknown_after_partial_run() {
        let mut st = ShutterState::new(travel());
        let t0 = Instant::now();
        st.begin_move(Direction::Close, t0, None);
        let settled = st.settle_from_elapsed(t0 + Duration::from_secs(5));
        assert_eq!(settled, Position::Unknown);
    }

    #[test]
    fn unknown_calibrates_after_full_travel_run() {
        let mut st = ShutterState::new(travel());
        let t0 = Instant::now();
        st.begin_move(Direction::Close, t0, None);
        let settled = st.settle_from_elapsed(t0 + Duration::from_secs(19));
        assert_eq!(settled, Position::At(0.0));
        assert!(st.last_calibrated.is_some());
    }

    #[test]
    fn settle_on_target_clears_target_and_motion() {
        let mut st = ShutterState::seeded(travel(), Some(0.0), None);
        let t0 = Instant::now();
        st.begin_move(Direction::Open, t0, Some(50.0));
        st.settle_on_target();
        assert_eq!(st.position, Position::At(50.0));
        assert_eq!(st.motion, Motion::Idle);
        assert!(st.target.is_none());
        // interior landing is not a calibration point
        assert!(st.last_calibrated.is_none());
    }

    #[test]
    fn seeding_rejects_implausible_percentages() {
        assert_eq!(
            ShutterState::seeded(travel(), Some(130.0), None).position,
            Position::Unknown
        );
        assert_eq!(
            ShutterState::seeded(travel(), Some(f32::NAN), None).position,
            Position::Unknown
        );
    }

    #[test]
    fn time_for_is_proportional_and_directional() {
        let t = travel();
        assert_eq!(t.time_for(50.0, Direction::Open), Duration::from_secs(10));
        assert_eq!(t.time_for(50.0, Direction::Close), Duration::from_secs(9));
        assert_eq!(t.time_for(250.0, Direction::Open), Duration::from_secs(20));
    }
}

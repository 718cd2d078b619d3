//! Event normalization: raw switch events to abstract movement intents.

use std::collections::HashMap;

use serde::Deserialize;
use shutter_config::{Role, SwitchCfg};

use crate::position::{Direction, Motion, ShutterId};

/// Abstract action derived from a switch event. Ephemeral: produced per
/// event, consumed immediately by the movement scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    MoveUp,
    MoveDown,
    Stop,
    GotoPercent(f32),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SwitchAction {
    Pressed,
    Released,
}

/// One record from the wireless switch receiver.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawSwitchEvent {
    /// Raw switch id as the receiver reports it (device id plus button).
    pub switch: String,
    pub action: SwitchAction,
    /// How long the button was held, present on releases.
    #[serde(default)]
    pub hold_ms: Option<u64>,
    /// Batteryless switches harvest press energy but still report a level.
    #[serde(default)]
    pub battery_percent: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub shutters: Vec<ShutterId>,
    pub role: Role,
    pub preset: Option<f32>,
}

/// Switch-to-shutter bindings, keyed by raw switch id.
#[derive(Debug, Default)]
pub struct SwitchMap {
    map: HashMap<String, Binding>,
}

impl SwitchMap {
    pub fn from_config(switches: &[SwitchCfg]) -> Self {
        let map = switches
            .iter()
            .map(|sw| {
                (
                    sw.id.clone(),
                    Binding {
                        shutters: sw.shutters.iter().map(|s| ShutterId::new(s.as_str())).collect(),
                        role: sw.role,
                        preset: sw.preset,
                    },
                )
            })
            .collect();
        Self { map }
    }

    pub fn get(&self, raw: &str) -> Option<&Binding> {
        self.map.get(raw)
    }
}

fn role_direction(role: Role) -> Direction {
    match role {
        Role::Up => Direction::Open,
        Role::Down => Direction::Close,
    }
}

/// Releases reported later than this are receiver hiccups, not gestures.
const MAX_HOLD_MS: u64 = 30_000;

/// Map a raw switch event to movement intents. Pure: reads current motion
/// through `motion_of`, mutates nothing. Unmapped switches yield an empty
/// vec; a binding may fan out to several shutters.
pub fn normalize(
    event: &RawSwitchEvent,
    switches: &SwitchMap,
    motion_of: impl Fn(&ShutterId) -> Motion,
    long_press_ms: u64,
) -> Vec<(ShutterId, Intent)> {
    let Some(binding) = switches.get(&event.switch) else {
        tracing::debug!(switch = %event.switch, "event from unmapped switch");
        return Vec::new();
    };

    match event.action {
        SwitchAction::Pressed => {
            let dir = role_direction(binding.role);
            binding
                .shutters
                .iter()
                .map(|id| {
                    // pressing the button of the running direction stops it
                    let intent = if motion_of(id).direction() == Some(dir) {
                        Intent::Stop
                    } else {
                        match dir {
                            Direction::Open => Intent::MoveUp,
                            Direction::Close => Intent::MoveDown,
                        }
                    };
                    (id.clone(), intent)
                })
                .collect()
        }
        SwitchAction::Released => {
            let Some(preset) = binding.preset else {
                return Vec::new();
            };
            match event.hold_ms {
                Some(held) if held >= long_press_ms && held <= MAX_HOLD_MS => binding
                    .shutters
                    .iter()
                    .map(|id| (id.clone(), Intent::GotoPercent(preset)))
                    .collect(),
                _ => Vec::new(),
            }
        }
    }
}

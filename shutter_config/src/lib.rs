#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the shutter controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - One `[[shutter]]` table per motor with its calibrated travel times,
//!   one `[[switch]]` table per wireless switch button binding.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service-wide knobs.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceCfg {
    /// Hold duration (ms) above which a release counts as a long press.
    pub long_press_ms: u64,
    /// Extra run time (ms) granted to endpoint-target moves so the motor
    /// reliably reaches its mechanical stop.
    pub endpoint_margin_ms: u64,
    /// Where estimated positions are persisted across restarts.
    pub state_file: PathBuf,
}

impl Default for ServiceCfg {
    fn default() -> Self {
        Self {
            long_press_ms: 1000,
            endpoint_margin_ms: 500,
            state_file: PathBuf::from("shutter_state.json"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // log file path; console-only when unset
    pub level: Option<String>, // "info","debug"
}

/// Serial bridge to the motor controller.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkCfg {
    /// Helper binary invoked as `<command> <verb> <channel>`.
    pub command: String,
    /// Minimum gap between two serial commands (ms); the legacy controller
    /// drops commands that arrive back to back.
    pub send_delay_ms: u64,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            command: "shuttercmd".to_string(),
            send_delay_ms: 100,
        }
    }
}

/// One motorized shutter.
#[derive(Debug, Deserialize, Clone)]
pub struct ShutterCfg {
    /// Logical id used in switch bindings, logs, and persisted state.
    pub id: String,
    /// Identifier the motor controller knows this shutter by.
    pub channel: String,
    /// Full travel time from fully closed to fully open, seconds.
    pub open_secs: f32,
    /// Full travel time from fully open to fully closed, seconds.
    pub close_secs: f32,
}

impl ShutterCfg {
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs_f32(self.open_secs)
    }
    pub fn close_duration(&self) -> Duration {
        Duration::from_secs_f32(self.close_secs)
    }
}

/// Which movement a switch button commands.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Up,
    Down,
}

/// One wireless switch button bound to one or more shutters.
#[derive(Debug, Deserialize, Clone)]
pub struct SwitchCfg {
    /// Raw switch id as reported by the receiver (device id plus button).
    pub id: String,
    /// Shutters this button drives; a single rocker may drive a whole facade.
    pub shutters: Vec<String>,
    pub role: Role,
    /// Target percent for a long press on this button; absent disables the
    /// long-press gesture for this binding.
    #[serde(default)]
    pub preset: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub link: LinkCfg,
    #[serde(default, rename = "shutter")]
    pub shutters: Vec<ShutterCfg>,
    #[serde(default, rename = "switch")]
    pub switches: Vec<SwitchCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_path(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.shutters.is_empty() {
            eyre::bail!("at least one [[shutter]] must be configured");
        }

        let mut ids = std::collections::HashSet::new();
        let mut channels = std::collections::HashSet::new();
        for s in &self.shutters {
            if s.id.trim().is_empty() {
                eyre::bail!("shutter id must not be empty");
            }
            if !ids.insert(s.id.as_str()) {
                eyre::bail!("duplicate shutter id: {}", s.id);
            }
            if !channels.insert(s.channel.as_str()) {
                eyre::bail!("duplicate shutter channel: {}", s.channel);
            }
            if !s.open_secs.is_finite() || s.open_secs <= 0.0 {
                eyre::bail!("shutter {}: open_secs must be > 0", s.id);
            }
            if !s.close_secs.is_finite() || s.close_secs <= 0.0 {
                eyre::bail!("shutter {}: close_secs must be > 0", s.id);
            }
            if s.open_secs > 600.0 || s.close_secs > 600.0 {
                eyre::bail!("shutter {}: travel times above 10min are unreasonable", s.id);
            }
        }

        let mut switch_ids = std::collections::HashSet::new();
        for sw in &self.switches {
            if !switch_ids.insert(sw.id.as_str()) {
                eyre::bail!("duplicate switch id: {}", sw.id);
            }
            if sw.shutters.is_empty() {
                eyre::bail!("switch {}: must bind at least one shutter", sw.id);
            }
            for target in &sw.shutters {
                if !ids.contains(target.as_str()) {
                    eyre::bail!("switch {}: unknown shutter {}", sw.id, target);
                }
            }
            if let Some(p) = sw.preset
                && !(p.is_finite() && (0.0..=100.0).contains(&p))
            {
                eyre::bail!("switch {}: preset must be in [0, 100]", sw.id);
            }
        }

        if self.service.long_press_ms == 0 {
            eyre::bail!("service.long_press_ms must be >= 1");
        }
        if self.service.endpoint_margin_ms > 60_000 {
            eyre::bail!("service.endpoint_margin_ms is unreasonably large (>60s)");
        }
        if self.link.command.trim().is_empty() {
            eyre::bail!("link.command must not be empty");
        }
        if self.link.send_delay_ms > 5_000 {
            eyre::bail!("link.send_delay_ms is unreasonably large (>5s)");
        }

        Ok(())
    }
}

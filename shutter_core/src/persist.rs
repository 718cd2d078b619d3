//! Durable storage for position estimates.
//!
//! A restart must not lose calibration: estimates are flushed on every
//! settle and reloaded at startup. Records are forward-compatible (unknown
//! fields ignored) and individually droppable, so a corrupt record degrades
//! that one shutter to `Unknown` instead of poisoning the whole file.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Persisted per-shutter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub shutter_id: String,
    /// Percent open; absent means the estimate was unknown.
    #[serde(default)]
    pub estimated_position: Option<f32>,
    /// Unix seconds of the last endpoint run.
    #[serde(default)]
    pub last_calibrated_unix: Option<u64>,
}

pub trait StateStore: Send {
    fn load(&mut self) -> eyre::Result<Vec<PositionRecord>>;
    fn save(&mut self, records: &[PositionRecord]) -> eyre::Result<()>;
}

/// JSON-file store with atomic replace (write aside, then rename), so a
/// crash mid-save never leaves a truncated state file behind.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonStateStore {
    fn load(&mut self) -> eyre::Result<Vec<PositionRecord>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(eyre::eyre!("read state file {:?}: {}", self.path, e)),
        };
        let values: Vec<serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| eyre::eyre!("parse state file {:?}: {}", self.path, e))?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<PositionRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unreadable position record");
                }
            }
        }
        Ok(records)
    }

    fn save(&mut self, records: &[PositionRecord]) -> eyre::Result<()> {
        let text = serde_json::to_string_pretty(records)
            .map_err(|e| eyre::eyre!("encode state: {}", e))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|e| eyre::eyre!("write state file {:?}: {}", tmp, e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| eyre::eyre!("replace state file {:?}: {}", self.path, e))?;
        tracing::debug!(path = ?self.path, count = records.len(), "state saved");
        Ok(())
    }
}

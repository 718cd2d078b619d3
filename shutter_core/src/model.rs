//! Registry of per-shutter state.
//!
//! One entry per configured shutter, each behind its own mutex so shutters
//! never block one another. Entries are handed to the movement scheduler for
//! exclusive mutation; everyone else reads snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use shutter_config::ShutterCfg;

use crate::persist::PositionRecord;
use crate::position::{Motion, ShutterId, ShutterSnapshot, ShutterState, Travel};

pub struct PositionModel {
    entries: HashMap<ShutterId, Entry>,
}

struct Entry {
    state: Arc<Mutex<ShutterState>>,
    channel: String,
}

/// A poisoned entry still holds consistent data (every mutation completes
/// before the lock is released); keep serving rather than propagating panics
/// from an unrelated shutter's worker.
pub(crate) fn lock_state(state: &Mutex<ShutterState>) -> MutexGuard<'_, ShutterState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PositionModel {
    /// Build the registry from configuration, seeding estimates from
    /// persisted records. Shutters without a usable record start `Unknown`.
    pub fn from_config(shutters: &[ShutterCfg], seed: &[PositionRecord]) -> Self {
        let mut entries = HashMap::with_capacity(shutters.len());
        for cfg in shutters {
            let id = ShutterId::new(cfg.id.as_str());
            let travel = Travel {
                full_open: cfg.open_duration(),
                full_close: cfg.close_duration(),
            };
            let record = seed.iter().find(|r| r.shutter_id == cfg.id);
            let state = match record {
                Some(r) => ShutterState::seeded(travel, r.estimated_position, r.calibrated_at()),
                None => ShutterState::new(travel),
            };
            tracing::debug!(
                shutter = %id,
                channel = %cfg.channel,
                position = ?state.position,
                "shutter registered"
            );
            entries.insert(
                id,
                Entry {
                    state: Arc::new(Mutex::new(state)),
                    channel: cfg.channel.clone(),
                },
            );
        }
        Self { entries }
    }

    pub fn ids(&self) -> impl Iterator<Item = &ShutterId> {
        self.entries.keys()
    }

    pub fn contains(&self, id: &ShutterId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn channel(&self, id: &ShutterId) -> Option<&str> {
        self.entries.get(id).map(|e| e.channel.as_str())
    }

    pub(crate) fn entry(&self, id: &ShutterId) -> Option<Arc<Mutex<ShutterState>>> {
        self.entries.get(id).map(|e| Arc::clone(&e.state))
    }

    /// Current motion of a shutter; `Idle` for unknown ids.
    pub fn motion(&self, id: &ShutterId) -> Motion {
        self.entries
            .get(id)
            .map(|e| lock_state(&e.state).motion)
            .unwrap_or(Motion::Idle)
    }

    /// Snapshot for diagnostics; position is projected while moving.
    pub fn read(&self, id: &ShutterId, now: Instant) -> Option<ShutterSnapshot> {
        self.entries.get(id).map(|e| {
            let st = lock_state(&e.state);
            ShutterSnapshot {
                id: id.clone(),
                position: st.projected(now),
                motion: st.motion,
                target: st.target,
                last_calibrated: st.last_calibrated,
            }
        })
    }

    /// Records for the persistence adapter. Projections are used so that a
    /// flush during a movement stores the best estimate available.
    pub fn snapshot_records(&self, now: Instant) -> Vec<PositionRecord> {
        let mut records: Vec<PositionRecord> = self
            .entries
            .iter()
            .map(|(id, e)| {
                let st = lock_state(&e.state);
                PositionRecord {
                    shutter_id: id.as_str().to_string(),
                    estimated_position: st.projected(now).percent(),
                    last_calibrated_unix: st.last_calibrated.and_then(unix_seconds),
                }
            })
            .collect();
        records.sort_by(|a, b| a.shutter_id.cmp(&b.shutter_id));
        records
    }
}

fn unix_seconds(t: SystemTime) -> Option<u64> {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

impl PositionRecord {
    fn calibrated_at(&self) -> Option<SystemTime> {
        self.last_calibrated_unix
            .map(|s| SystemTime::UNIX_EPOCH + Duration::from_secs(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn cfg(id: &str, channel: &str) -> ShutterCfg {
        ShutterCfg {
            id: id.to_string(),
            channel: channel.to_string(),
            open_secs: 20.0,
            close_secs: 18.0,
        }
    }

    #[test]
    fn seeds_from_matching_records_only() {
        let records = vec![PositionRecord {
            shutter_id: "a".to_string(),
            estimated_position: Some(40.0),
            last_calibrated_unix: Some(1_700_000_000),
        }];
        let model = PositionModel::from_config(&[cfg("a", "v1"), cfg("b", "v2")], &records);

        let now = Instant::now();
        let a = model.read(&ShutterId::from("a"), now).expect("a");
        let b = model.read(&ShutterId::from("b"), now).expect("b");
        assert_eq!(a.position, Position::At(40.0));
        assert_eq!(b.position, Position::Unknown);
        assert!(a.last_calibrated.is_some());
    }

    #[test]
    fn snapshot_records_round_trip_through_seeding() {
        let model = PositionModel::from_config(
            &[cfg("a", "v1")],
            &[PositionRecord {
                shutter_id: "a".to_string(),
                estimated_position: Some(62.5),
                last_calibrated_unix: None,
            }],
        );
        let records = model.snapshot_records(Instant::now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].estimated_position, Some(62.5));
    }

    #[test]
    fn unknown_id_reads_as_none_and_idle() {
        let model = PositionModel::from_config(&[cfg("a", "v1")], &[]);
        let ghost = ShutterId::from("ghost");
        assert!(model.read(&ghost, Instant::now()).is_none());
        assert_eq!(model.motion(&ghost), Motion::Idle);
    }
}

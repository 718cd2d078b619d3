//! Test doubles shared by the crate's unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use shutter_traits::{Clock, MotorLink};

use crate::drive::Command;
use crate::persist::{PositionRecord, StateStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub channel: String,
    pub command: Command,
    pub at: Instant,
}

/// Link that records every command with its send instant. Clones share the
/// same log, so a test can keep one handle while the drive owns another.
#[derive(Clone)]
pub struct RecordingLink {
    log: Arc<Mutex<Vec<SentCommand>>>,
    fail_remaining: Arc<AtomicUsize>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl RecordingLink {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_remaining: Arc::new(AtomicUsize::new(0)),
            clock,
        }
    }

    /// Make the next `n` commands fail without being recorded.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<SentCommand> {
        lock(&self.log).clone()
    }

    pub fn commands_for(&self, channel: &str) -> Vec<Command> {
        self.commands()
            .into_iter()
            .filter(|c| c.channel == channel)
            .map(|c| c.command)
            .collect()
    }

    fn record(
        &mut self,
        channel: &str,
        command: Command,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err("link down".into());
        }
        lock(&self.log).push(SentCommand {
            channel: channel.to_string(),
            command,
            at: self.clock.now(),
        });
        Ok(())
    }
}

impl MotorLink for RecordingLink {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.record(channel, Command::Open)
    }
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.record(channel, Command::Close)
    }
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.record(channel, Command::Stop)
    }
}

/// In-memory store capturing every save for assertions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub seed: Vec<PositionRecord>,
    pub saves: Arc<Mutex<Vec<Vec<PositionRecord>>>>,
}

impl MemoryStore {
    pub fn seeded(seed: Vec<PositionRecord>) -> Self {
        Self {
            seed,
            saves: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn last_save(&self) -> Option<Vec<PositionRecord>> {
        lock(&self.saves).last().cloned()
    }

    pub fn save_count(&self) -> usize {
        lock(&self.saves).len()
    }
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> eyre::Result<Vec<PositionRecord>> {
        Ok(self.seed.clone())
    }

    fn save(&mut self, records: &[PositionRecord]) -> eyre::Result<()> {
        lock(&self.saves).push(records.to_vec());
        Ok(())
    }
}

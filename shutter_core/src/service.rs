//! Service runtime: one worker thread per shutter plus a persistence worker.
//!
//! Each worker owns its shutter's drive and serializes intents for it, so
//! two gestures can never race one shutter's state while different shutters
//! move concurrently. The armed stop deadline is the worker's channel wait:
//! a new intent interrupts it (cancellation) and a timeout is the timer
//! firing, so a replaced deadline can never fire stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use shutter_config::Config;
use shutter_traits::{Clock, MotorLink};

use crate::drive::{DriveStatus, ShutterDrive};
use crate::error::{ControlError, Result};
use crate::intent::{Intent, RawSwitchEvent, SwitchMap, normalize};
use crate::model::PositionModel;
use crate::persist::StateStore;
use crate::position::{ShutterId, ShutterSnapshot};

enum WorkerMsg {
    Intent(Intent),
    Shutdown,
}

/// Switches reporting at or below this level get a low-battery warning.
const BATTERY_WARN_PERCENT: u8 = 5;

pub struct ShutterService {
    model: Arc<PositionModel>,
    switch_map: SwitchMap,
    long_press_ms: u64,
    clock: Arc<dyn Clock + Send + Sync>,
    workers: HashMap<ShutterId, Sender<WorkerMsg>>,
    worker_handles: Vec<(ShutterId, JoinHandle<()>)>,
    persist_tx: Option<Sender<()>>,
    persist_handle: Option<JoinHandle<()>>,
}

impl ShutterService {
    /// Load persisted estimates, build the position model, and spawn one
    /// worker per configured shutter. The link is cloned per worker; pass a
    /// shared wrapper when the underlying transport must be exclusive.
    pub fn start<L>(
        cfg: &Config,
        link: L,
        mut store: Box<dyn StateStore>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self>
    where
        L: MotorLink + Clone + Send + 'static,
    {
        let seed = match store.load() {
            Ok(records) => records,
            Err(e) => {
                // degrade to Unknown rather than trusting corrupt data
                tracing::warn!(error = %e, "state load failed; starting uncalibrated");
                Vec::new()
            }
        };
        let model = Arc::new(PositionModel::from_config(&cfg.shutters, &seed));
        let endpoint_margin = std::time::Duration::from_millis(cfg.service.endpoint_margin_ms);

        let (persist_tx, persist_rx) = crossbeam_channel::bounded::<()>(1);
        let persist_handle = spawn_persist_worker(
            Arc::clone(&model),
            store,
            persist_rx,
            Arc::clone(&clock),
        )?;

        let mut workers = HashMap::new();
        let mut worker_handles = Vec::new();
        for shutter in &cfg.shutters {
            let id = ShutterId::new(shutter.id.as_str());
            let state = model
                .entry(&id)
                .ok_or_else(|| ControlError::UnknownShutter(shutter.id.clone()))?;
            let drive = ShutterDrive::new(
                id.clone(),
                shutter.channel.as_str(),
                link.clone(),
                state,
                Arc::clone(&clock),
                endpoint_margin,
            );
            let (tx, rx) = crossbeam_channel::unbounded::<WorkerMsg>();
            let flush = persist_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("shutter-{id}"))
                .spawn(move || run_worker(drive, rx, flush))
                .map_err(|e| eyre::eyre!("spawn worker for {}: {}", shutter.id, e))?;
            workers.insert(id.clone(), tx);
            worker_handles.push((id, handle));
        }

        tracing::info!(shutters = worker_handles.len(), "shutter service started");
        Ok(Self {
            model,
            switch_map: SwitchMap::from_config(&cfg.switches),
            long_press_ms: cfg.service.long_press_ms,
            clock,
            workers,
            worker_handles,
            persist_tx: Some(persist_tx),
            persist_handle: Some(persist_handle),
        })
    }

    /// Route one receiver event: normalize it and queue the resulting
    /// intents on the bound shutters' workers.
    pub fn handle_event(&self, event: &RawSwitchEvent) {
        if let Some(level) = event.battery_percent
            && level <= BATTERY_WARN_PERCENT
        {
            tracing::warn!(switch = %event.switch, battery_percent = level, "switch battery low");
        }
        let intents = normalize(
            event,
            &self.switch_map,
            |id| self.model.motion(id),
            self.long_press_ms,
        );
        for (id, intent) in intents {
            if let Err(e) = self.submit(&id, intent) {
                tracing::warn!(shutter = %id, error = %e, "intent not queued");
            }
        }
    }

    /// Queue one intent for a shutter (also used by the one-shot CLI path).
    pub fn submit(&self, id: &ShutterId, intent: Intent) -> Result<()> {
        let tx = self
            .workers
            .get(id)
            .ok_or_else(|| ControlError::UnknownShutter(id.as_str().to_string()))?;
        tx.send(WorkerMsg::Intent(intent))
            .map_err(|_| eyre::eyre!("worker for {} is gone", id))
    }

    pub fn read(&self, id: &ShutterId) -> Option<ShutterSnapshot> {
        self.model.read(id, self.clock.now())
    }

    pub fn snapshots(&self) -> Vec<ShutterSnapshot> {
        let now = self.clock.now();
        let mut ids: Vec<&ShutterId> = self.model.ids().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.model.read(id, now))
            .collect()
    }

    /// Stop accepting work, join the workers, and flush state one final
    /// time. The persistence worker is joined last so the freshest estimates
    /// always reach disk.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        for (id, tx) in self.workers.drain() {
            if tx.send(WorkerMsg::Shutdown).is_err() {
                tracing::warn!(shutter = %id, "worker already gone at shutdown");
            }
        }
        for (id, handle) in self.worker_handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!(shutter = %id, "worker panicked");
            }
        }
        // dropping the sender lets the persistence worker run its final flush
        self.persist_tx.take();
        if let Some(handle) = self.persist_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("persistence worker panicked");
        }
        tracing::info!("shutter service stopped");
        Ok(())
    }
}

impl Drop for ShutterService {
    fn drop(&mut self) {
        if self.persist_handle.is_some() {
            let _ = self.shutdown_inner();
        }
    }
}

fn run_worker<L: MotorLink>(
    mut drive: ShutterDrive<L>,
    rx: Receiver<WorkerMsg>,
    flush: Sender<()>,
) {
    let mut deadline = None;
    loop {
        let msg = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(msg) => Some(msg),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };
        match msg {
            Some(WorkerMsg::Shutdown) => break,
            Some(WorkerMsg::Intent(intent)) => match drive.apply(intent) {
                Ok(DriveStatus::Idle) => {
                    deadline = None;
                    let _ = flush.try_send(());
                }
                Ok(DriveStatus::Moving { deadline: next }) => deadline = next,
                Ok(DriveStatus::Unchanged) => {}
                // state was left as-is; a stale deadline is caught by the
                // drive's idle guard, so keep whatever was armed
                Err(e) => tracing::warn!(shutter = %drive.id(), error = %e, "intent rejected"),
            },
            None => {
                deadline = None;
                match drive.on_deadline() {
                    Ok(DriveStatus::Idle) => {
                        let _ = flush.try_send(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(shutter = %drive.id(), error = %e, "scheduled stop failed")
                    }
                }
            }
        }
    }
}

fn spawn_persist_worker(
    model: Arc<PositionModel>,
    mut store: Box<dyn StateStore>,
    rx: Receiver<()>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("shutter-persist".to_string())
        .spawn(move || {
            let save = |store: &mut dyn StateStore| {
                let records = model.snapshot_records(clock.now());
                if let Err(e) = store.save(&records) {
                    tracing::warn!(error = %e, "state save failed");
                }
            };
            while rx.recv().is_ok() {
                save(store.as_mut());
            }
            // channel closed: final flush before the process may stop
            save(store.as_mut());
        })
        .map_err(|e| eyre::eyre!("spawn persistence worker: {}", e))
}

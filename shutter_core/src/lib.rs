#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core shutter control logic (transport-agnostic).
//!
//! Turns wireless-switch events into serial motor commands while keeping a
//! per-shutter position estimate. There is no position feedback: estimates
//! are derived from elapsed movement time against calibrated travel
//! durations, and are exact only right after a run into a mechanical
//! endpoint. All motor traffic goes through `shutter_traits::MotorLink`.
//!
//! ## Architecture
//!
//! - **Normalization**: raw switch events to intents (`intent` module)
//! - **Position model**: per-shutter estimates behind per-entry locks
//!   (`position`, `model`)
//! - **Movement scheduling**: intent state machine + deadline enforcement
//!   (`drive`), worker threads and assembly (`service`)
//! - **Persistence**: estimates survive restarts (`persist`)

pub mod drive;
pub mod error;
pub mod intent;
pub mod mocks;
pub mod model;
pub mod persist;
pub mod position;
pub mod service;

pub use drive::{Command, DriveStatus, ShutterDrive};
pub use error::{ControlError, Result};
pub use intent::{Intent, RawSwitchEvent, SwitchAction, SwitchMap, normalize};
pub use model::PositionModel;
pub use persist::{JsonStateStore, PositionRecord, StateStore};
pub use position::{
    Direction, Motion, Position, ShutterId, ShutterSnapshot, ShutterState, Travel,
};
pub use service::ShutterService;

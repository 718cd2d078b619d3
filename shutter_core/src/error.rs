use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ControlError {
    #[error("shutter {shutter}: position unknown, run a full open or close to calibrate")]
    CalibrationRequired { shutter: String },
    #[error("shutter {shutter}: {command} command failed: {reason}")]
    CommandFailed {
        shutter: String,
        command: &'static str,
        reason: String,
    },
    #[error("state store error: {0}")]
    Persistence(String),
    #[error("unknown shutter: {0}")]
    UnknownShutter(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

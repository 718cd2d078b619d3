pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Command channel to the shutter-motor controller.
///
/// `channel` is the motor controller's identifier for the shutter, as
/// configured; it is not the logical shutter id. Implementations must not
/// return until the outcome of the command is known.
pub trait MotorLink {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<L: MotorLink + ?Sized> MotorLink for Box<L> {
    fn open(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).open(channel)
    }
    fn close(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).close(channel)
    }
    fn stop(&mut self, channel: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).stop(channel)
    }
}

//! Narrow interfaces to the collaborators the scheduler drives or reads.

use thiserror::Error;

use crate::types::LocalTime;

/// Wall-clock source. Implementations degrade to their last known value
/// instead of failing.
pub trait Clock {
    fn now(&self) -> LocalTime;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PwmError {
    #[error("unknown PWM channel {0}")]
    UnknownChannel(String),
    #[error("duty cycle {0}% out of range")]
    DutyOutOfRange(u8),
    #[error("PWM hardware error: {0}")]
    Hardware(String),
}

/// PWM output, addressed by channel key.
pub trait PwmSink {
    fn set_duty_percent(&mut self, channel: &str, percent: u8) -> Result<(), PwmError>;
}

/// Converts a duty percentage into a 16-bit compare value.
pub fn duty_u16(percent: u8) -> u16 {
    (percent.min(100) as u32 * u16::MAX as u32 / 100) as u16
}

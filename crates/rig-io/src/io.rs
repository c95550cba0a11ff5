use crate::error::HardwareError;
use std::sync::Arc;
use std::time::Duration;

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Relay contact state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    #[default]
    Off,
    On,
}

/// Result of a bounded edge wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWait {
    Edge,
    TimedOut,
}

/// A digital line configured as an input.
pub trait DigitalInput: Send + Sync {
    fn read(&self) -> Result<Level, HardwareError>;
}

/// A digital line configured as an output.
pub trait DigitalOutput: Send + Sync {
    fn write(&self, level: Level) -> Result<(), HardwareError>;
}

/// A digital input with edge detection. `wait_rising` blocks the
/// calling thread until a rising edge arrives or the timeout elapses;
/// edges are delivered in order to a single consumer.
pub trait EdgeInput: Send + Sync {
    fn wait_rising(&self, timeout: Duration) -> Result<EdgeWait, HardwareError>;
}

/// An analog input returning a ratio in [0.0, 1.0], averaged over the
/// requested sample count.
pub trait AnalogInput: Send + Sync {
    fn read_ratio(&self, samples: u32) -> Result<f64, HardwareError>;
}

/// A PWM output channel.
pub trait PwmOutput: Send + Sync {
    fn set_frequency(&self, hz: f64) -> Result<(), HardwareError>;
    fn set_duty_percent(&self, percent: f64) -> Result<(), HardwareError>;
    fn start(&self) -> Result<(), HardwareError>;
    fn stop(&self) -> Result<(), HardwareError>;
    fn is_running(&self) -> bool;
}

/// A register-addressed bus device (the melt-chamber thermometer).
pub trait RegisterBus: Send + Sync {
    fn read_register(&self, addr: u8) -> Result<u16, HardwareError>;
}

/// A power relay.
pub trait Relay: Send + Sync {
    fn set_state(&self, state: RelayState) -> Result<(), HardwareError>;
    fn state(&self) -> Result<RelayState, HardwareError>;
}

pub type SharedInput = Arc<dyn DigitalInput>;
pub type SharedOutput = Arc<dyn DigitalOutput>;
pub type SharedEdge = Arc<dyn EdgeInput>;
pub type SharedAnalog = Arc<dyn AnalogInput>;
pub type SharedPwm = Arc<dyn PwmOutput>;
pub type SharedBus = Arc<dyn RegisterBus>;
pub type SharedRelay = Arc<dyn Relay>;

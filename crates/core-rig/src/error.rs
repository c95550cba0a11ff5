use crate::mission::Phase;
use rig_io::HardwareError;
use thiserror::Error;

/// Errors surfaced by the control subsystems.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid speed {value}: {reason}")]
    InvalidSpeed { value: f64, reason: &'static str },

    #[error("invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("background loop already running")]
    AlreadyRunning,

    #[error("background loop not running")]
    NotRunning,

    #[error("failed to start background loop: {0}")]
    StartFailure(String),

    #[error("background worker panicked")]
    WorkerPanicked,

    #[error("axis position is uncalibrated; home the axis first")]
    NotCalibrated,

    #[error("{operation} exceeded its safety bound")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// A mission failure names the phase and hole so an operator can
/// resume safely.
#[derive(Debug, Error)]
#[error("mission failed at hole {hole} during {phase}: {source}")]
pub struct MissionError {
    pub hole: usize,
    pub phase: Phase,
    #[source]
    pub source: ControlError,
}

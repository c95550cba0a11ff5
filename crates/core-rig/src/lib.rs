pub mod axis;
pub mod cancel;
pub mod dcmotor;
pub mod drilling;
pub mod error;
pub mod leadscrew;
pub mod melting;
pub mod mission;
pub mod plunge;
pub mod power;
mod regulation_proptest;
pub mod servo;
pub mod stepper;
pub mod telemetry;

pub use axis::{AxisConfig, LinearAxis};
pub use cancel::CancelToken;
pub use dcmotor::DcMotor;
pub use drilling::{DrillConfig, DrillingSystem, SpeedEstimator};
pub use error::{ControlError, MissionError};
pub use leadscrew::Leadscrew;
pub use melting::{MeltConfig, MeltingSystem};
pub use mission::{MissionConfig, MissionReport, MissionSequencer, Phase};
pub use plunge::{PlungeAxis, PlungeConfig};
pub use power::{Output, PowerController, RelayBank};
pub use servo::CapServo;
pub use stepper::{Direction, StepperMotor};
pub use telemetry::{TelemetrySampler, TelemetrySnapshot};

pub mod error;
pub mod io;
pub mod sensors;
#[cfg(feature = "simulation")]
pub mod sim;
#[cfg(feature = "simulation")]
pub mod sim_rig;

pub use error::HardwareError;
pub use io::{
    AnalogInput, DigitalInput, DigitalOutput, EdgeInput, EdgeWait, Level, PwmOutput, RegisterBus,
    Relay, RelayState, SharedAnalog, SharedBus, SharedEdge, SharedInput, SharedOutput, SharedPwm,
    SharedRelay,
};
pub use sensors::{
    CurrentSensor, GpioProximity, LoadCell, ProximitySensor, RatioCurrentSensor,
    RegisterThermometer, SharedCurrentSensor, SharedLoadCell, SharedProximity, SharedThermometer,
    Thermometer,
};
#[cfg(feature = "simulation")]
pub use sim::{
    SimAnalog, SimBus, SimEdge, SimEdgePulser, SimLine, SimLoadCell, SimProximity, SimPwm,
    SimRelay, SimThermometer,
};
#[cfg(feature = "simulation")]
pub use sim_rig::{SimRig, SimRigConfig, SimRigHandles};

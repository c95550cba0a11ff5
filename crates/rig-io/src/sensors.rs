//! Sensor adapters at the interface boundary: each one converts a raw
//! peripheral reading into a physical unit and nothing more.

use crate::error::HardwareError;
use crate::io::{Level, SharedAnalog, SharedBus, SharedInput};
use std::sync::Arc;

/// Inductive proximity sensor marking a travel limit.
pub trait ProximitySensor: Send + Sync {
    fn is_triggered(&self) -> Result<bool, HardwareError>;
}

/// Current sensor in amps.
pub trait CurrentSensor: Send + Sync {
    fn current_amps(&self) -> Result<f64, HardwareError>;
}

/// Non-contact thermometer reading the melt-chamber surface.
pub trait Thermometer: Send + Sync {
    fn object_temp_c(&self) -> Result<f64, HardwareError>;
}

/// Load cell measuring axial force on the drill bit (weight on bit).
pub trait LoadCell: Send + Sync {
    fn weight_kg(&self) -> Result<f64, HardwareError>;
}

pub type SharedProximity = Arc<dyn ProximitySensor>;
pub type SharedCurrentSensor = Arc<dyn CurrentSensor>;
pub type SharedThermometer = Arc<dyn Thermometer>;
pub type SharedLoadCell = Arc<dyn LoadCell>;

/// Proximity sensor on a plain digital input, active high.
pub struct GpioProximity {
    line: SharedInput,
}

impl GpioProximity {
    pub fn new(line: SharedInput) -> Self {
        Self { line }
    }
}

impl ProximitySensor for GpioProximity {
    fn is_triggered(&self) -> Result<bool, HardwareError> {
        Ok(self.line.read()? == Level::High)
    }
}

/// Current sensor backed by an ADC channel whose [0, 1] ratio maps
/// linearly onto an amp range (LEM LTS 6-NP and i-Snail-VC style).
pub struct RatioCurrentSensor {
    adc: SharedAnalog,
    amps_min: f64,
    amps_max: f64,
    samples: u32,
}

impl RatioCurrentSensor {
    pub fn new(adc: SharedAnalog, amps_min: f64, amps_max: f64, samples: u32) -> Self {
        Self {
            adc,
            amps_min,
            amps_max,
            samples,
        }
    }
}

impl CurrentSensor for RatioCurrentSensor {
    fn current_amps(&self) -> Result<f64, HardwareError> {
        let ratio = self.adc.read_ratio(self.samples)?;
        Ok(ratio * (self.amps_max - self.amps_min) + self.amps_min)
    }
}

/// Object-temperature register of an MLX90614-style IR thermometer.
pub const THERMOMETER_OBJECT_REGISTER: u8 = 0x07;

/// Thermometer over a register-addressed bus. The raw 16-bit value is
/// in units of 0.02 K.
pub struct RegisterThermometer {
    bus: SharedBus,
    register: u8,
}

impl RegisterThermometer {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            register: THERMOMETER_OBJECT_REGISTER,
        }
    }
}

impl Thermometer for RegisterThermometer {
    fn object_temp_c(&self) -> Result<f64, HardwareError> {
        let raw = self.bus.read_register(self.register)?;
        Ok(0.02 * f64::from(raw) - 273.15)
    }
}

//! Relay power switching. Relays are process-wide shared state, so a
//! single controller owns the whole bank and serializes every write
//! behind one lock. The bank starts OFF and is forced OFF again on
//! drop, covering error paths that bail out mid-cycle.

use crate::error::ControlError;
use rig_io::{RelayState, SharedRelay};
use std::sync::Mutex;
use tracing::{debug, warn};

/// The rig's named relay outputs. The two heater relays switch the
/// halves of one heating element and are driven as a single logical
/// output.
pub struct RelayBank {
    pub chiller: SharedRelay,
    pub heater_a: SharedRelay,
    pub heater_b: SharedRelay,
    pub drill: SharedRelay,
    pub proximity: SharedRelay,
    pub motor_x: SharedRelay,
    pub motor_z: SharedRelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Chiller,
    Heater,
    Drill,
    Proximity,
    MotorX,
    MotorZ,
}

impl Output {
    pub fn name(self) -> &'static str {
        match self {
            Output::Chiller => "chiller",
            Output::Heater => "heater",
            Output::Drill => "drill",
            Output::Proximity => "proximity",
            Output::MotorX => "motor-x",
            Output::MotorZ => "motor-z",
        }
    }
}

pub struct PowerController {
    bank: Mutex<RelayBank>,
}

impl PowerController {
    /// Take ownership of the bank, forcing every relay OFF.
    pub fn new(bank: RelayBank) -> Result<Self, ControlError> {
        let controller = Self {
            bank: Mutex::new(bank),
        };
        controller.turn_off_all()?;
        Ok(controller)
    }

    pub fn turn_on(&self, output: Output) -> Result<(), ControlError> {
        self.set(output, RelayState::On)
    }

    pub fn turn_off(&self, output: Output) -> Result<(), ControlError> {
        self.set(output, RelayState::Off)
    }

    pub fn set(&self, output: Output, state: RelayState) -> Result<(), ControlError> {
        let bank = self.bank.lock().unwrap();
        debug!(output = output.name(), ?state, "relay switch");
        match output {
            Output::Chiller => bank.chiller.set_state(state)?,
            Output::Heater => {
                bank.heater_a.set_state(state)?;
                bank.heater_b.set_state(state)?;
            }
            Output::Drill => bank.drill.set_state(state)?,
            Output::Proximity => bank.proximity.set_state(state)?,
            Output::MotorX => bank.motor_x.set_state(state)?,
            Output::MotorZ => bank.motor_z.set_state(state)?,
        }
        Ok(())
    }

    /// Reported state; the logical heater is ON only when both of its
    /// relays are ON.
    pub fn state(&self, output: Output) -> Result<RelayState, ControlError> {
        let bank = self.bank.lock().unwrap();
        let state = match output {
            Output::Chiller => bank.chiller.state()?,
            Output::Heater => {
                if bank.heater_a.state()? == RelayState::On
                    && bank.heater_b.state()? == RelayState::On
                {
                    RelayState::On
                } else {
                    RelayState::Off
                }
            }
            Output::Drill => bank.drill.state()?,
            Output::Proximity => bank.proximity.state()?,
            Output::MotorX => bank.motor_x.state()?,
            Output::MotorZ => bank.motor_z.state()?,
        };
        Ok(state)
    }

    /// Switch every relay OFF. Every relay is attempted even when an
    /// earlier one fails; the first failure is reported.
    pub fn turn_off_all(&self) -> Result<(), ControlError> {
        let bank = self.bank.lock().unwrap();
        let mut first_error = None;
        for (name, relay) in [
            ("chiller", &bank.chiller),
            ("heater-a", &bank.heater_a),
            ("heater-b", &bank.heater_b),
            ("drill", &bank.drill),
            ("proximity", &bank.proximity),
            ("motor-x", &bank.motor_x),
            ("motor-z", &bank.motor_z),
        ] {
            if let Err(e) = relay.set_state(RelayState::Off) {
                warn!(relay = name, error = %e, "relay failed to switch off");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for PowerController {
    fn drop(&mut self) {
        if let Err(e) = self.turn_off_all() {
            warn!(error = %e, "relay bank not fully off at shutdown");
        }
    }
}

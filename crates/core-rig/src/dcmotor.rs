//! DC motor behind an H-bridge: PWM duty cycle for speed, two
//! direction lines, start/stop gating the PWM carrier.

use crate::error::ControlError;
use crate::stepper::Direction;
use rig_io::{Level, SharedOutput, SharedPwm};

pub struct DcMotor {
    pwm: SharedPwm,
    in1: SharedOutput,
    in2: SharedOutput,
    direction: Option<Direction>,
    speed_percent: f64,
    running: bool,
}

impl DcMotor {
    pub fn new(
        pwm: SharedPwm,
        in1: SharedOutput,
        in2: SharedOutput,
        pwm_frequency_hz: f64,
    ) -> Result<Self, ControlError> {
        pwm.set_frequency(pwm_frequency_hz)?;
        pwm.set_duty_percent(0.0)?;
        let mut motor = Self {
            pwm,
            in1,
            in2,
            direction: None,
            speed_percent: 0.0,
            running: false,
        };
        motor.set_direction(Direction::Forward)?;
        Ok(motor)
    }

    pub fn speed_percent(&self) -> f64 {
        self.speed_percent
    }

    pub fn direction(&self) -> Direction {
        self.direction.unwrap_or(Direction::Forward)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Set duty-cycle percent, clamped to [0, 100].
    pub fn set_speed_percent(&mut self, percent: f64) -> Result<(), ControlError> {
        if !percent.is_finite() {
            return Err(ControlError::InvalidSpeed {
                value: percent,
                reason: "duty cycle must be finite",
            });
        }
        let clamped = percent.clamp(0.0, 100.0);
        self.pwm.set_duty_percent(clamped)?;
        self.speed_percent = clamped;
        Ok(())
    }

    /// Apply a direction, touching the H-bridge lines only on change.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), ControlError> {
        if self.direction == Some(direction) {
            return Ok(());
        }
        match direction {
            Direction::Forward => {
                self.in1.write(Level::High)?;
                self.in2.write(Level::Low)?;
            }
            Direction::Reverse => {
                self.in1.write(Level::Low)?;
                self.in2.write(Level::High)?;
            }
        }
        self.direction = Some(direction);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ControlError> {
        self.pwm.start()?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        self.pwm.stop()?;
        self.running = false;
        Ok(())
    }
}

impl Drop for DcMotor {
    fn drop(&mut self) {
        if self.running {
            let _ = self.stop();
        }
    }
}

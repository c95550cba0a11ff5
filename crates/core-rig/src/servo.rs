//! Hobby-servo positioning for the crucible cap. Angle commands are
//! translated to the standard RC pulse scheme: a pulse width swept
//! between `pulse_min_ms` and `pulse_max_ms` encodes the position
//! across the servo's mechanical range.

use crate::error::ControlError;
use rig_io::SharedPwm;

pub struct CapServo {
    pwm: SharedPwm,
    /// Full mechanical sweep in degrees; commands span +-range/2.
    range_deg: f64,
    frequency_hz: f64,
    pulse_min_ms: f64,
    pulse_max_ms: f64,
    angle_deg: f64,
    powered: bool,
}

impl CapServo {
    /// Standard RC servo: 100 Hz carrier, 0.5 ms to 2.5 ms pulse over
    /// a 180 degree sweep.
    pub fn new(pwm: SharedPwm) -> Result<Self, ControlError> {
        Self::with_timing(pwm, 180.0, 100.0, 0.5, 2.5)
    }

    pub fn with_timing(
        pwm: SharedPwm,
        range_deg: f64,
        frequency_hz: f64,
        pulse_min_ms: f64,
        pulse_max_ms: f64,
    ) -> Result<Self, ControlError> {
        if !(range_deg.is_finite() && range_deg > 0.0) {
            return Err(ControlError::InvalidParameter {
                name: "range_deg",
                value: range_deg,
            });
        }
        pwm.set_frequency(frequency_hz)?;
        let mut servo = Self {
            pwm,
            range_deg,
            frequency_hz,
            pulse_min_ms,
            pulse_max_ms,
            angle_deg: 0.0,
            powered: false,
        };
        servo.set_angle(0.0)?;
        Ok(servo)
    }

    pub fn angle_deg(&self) -> f64 {
        self.angle_deg
    }

    /// Command an angle, clamped to the mechanical range. Zero is the
    /// center of the sweep.
    pub fn set_angle(&mut self, angle_deg: f64) -> Result<(), ControlError> {
        if !angle_deg.is_finite() {
            return Err(ControlError::InvalidParameter {
                name: "angle_deg",
                value: angle_deg,
            });
        }
        let half = self.range_deg / 2.0;
        let clamped = angle_deg.clamp(-half, half);
        self.pwm.set_duty_percent(self.duty_for(clamped))?;
        self.angle_deg = clamped;
        Ok(())
    }

    pub fn power_on(&mut self) -> Result<(), ControlError> {
        self.pwm.start()?;
        self.powered = true;
        Ok(())
    }

    pub fn power_off(&mut self) -> Result<(), ControlError> {
        self.pwm.stop()?;
        self.powered = false;
        Ok(())
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn duty_for(&self, angle_deg: f64) -> f64 {
        let ratio = (angle_deg + self.range_deg / 2.0) / self.range_deg;
        let period_ms = 1000.0 / self.frequency_hz;
        let pulse_ms = self.pulse_min_ms + ratio * (self.pulse_max_ms - self.pulse_min_ms);
        pulse_ms / period_ms * 100.0
    }
}

impl Drop for CapServo {
    fn drop(&mut self) {
        if self.powered {
            let _ = self.power_off();
        }
    }
}

//! Kinematic conversion from linear travel to leadscrew rotation.
//! No sensor awareness; callers own position bookkeeping.

use crate::error::ControlError;
use crate::stepper::StepperMotor;

pub struct Leadscrew {
    motor: StepperMotor,
    distance_per_rev_mm: f64,
    speed_mm_per_sec: f64,
}

impl Leadscrew {
    pub fn new(motor: StepperMotor, distance_per_rev_mm: f64) -> Result<Self, ControlError> {
        if !(distance_per_rev_mm.is_finite() && distance_per_rev_mm > 0.0) {
            return Err(ControlError::InvalidParameter {
                name: "distance_per_rev_mm",
                value: distance_per_rev_mm,
            });
        }
        let speed_mm_per_sec = motor.rpm() / 60.0 * distance_per_rev_mm;
        Ok(Self {
            motor,
            distance_per_rev_mm,
            speed_mm_per_sec,
        })
    }

    pub fn speed_mm_per_sec(&self) -> f64 {
        self.speed_mm_per_sec
    }

    pub fn distance_per_rev_mm(&self) -> f64 {
        self.distance_per_rev_mm
    }

    /// Set the linear travel speed, converted to motor RPM.
    pub fn set_speed_mm_per_sec(&mut self, mm_per_sec: f64) -> Result<(), ControlError> {
        let rpm = mm_per_sec / self.distance_per_rev_mm * 60.0;
        self.motor.set_rpm(rpm)?;
        self.speed_mm_per_sec = mm_per_sec;
        Ok(())
    }

    /// Travel a signed distance, blocking until the motion completes.
    /// Returns the distance actually covered by whole steps, signed.
    pub fn move_by(&mut self, distance_mm: f64) -> Result<f64, ControlError> {
        if !distance_mm.is_finite() {
            return Err(ControlError::InvalidParameter {
                name: "distance_mm",
                value: distance_mm,
            });
        }
        let degrees = distance_mm / self.distance_per_rev_mm * 360.0;
        let steps = self.motor.rotate(degrees)?;
        let step_mm =
            self.distance_per_rev_mm / f64::from(self.motor.steps_per_revolution());
        Ok(steps as f64 * step_mm * distance_mm.signum())
    }

    pub fn motor_mut(&mut self) -> &mut StepperMotor {
        &mut self.motor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_io::{Level, SimLine};
    use std::sync::Arc;

    fn screw(pulse: &SimLine, dir: &SimLine, distance_per_rev: f64) -> Leadscrew {
        let motor = StepperMotor::new(
            Arc::new(pulse.clone()),
            Arc::new(dir.clone()),
            None,
            6000.0,
            200,
        )
        .unwrap();
        Leadscrew::new(motor, distance_per_rev).unwrap()
    }

    #[test]
    fn speed_converts_to_rpm() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut s = screw(&pulse, &dir, 5.0);
        s.set_speed_mm_per_sec(10.0).unwrap();
        // 10 mm/s over a 5 mm pitch is 120 RPM.
        assert!((s.motor_mut().rpm() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn one_pitch_is_one_revolution() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut s = screw(&pulse, &dir, 5.0);
        let moved = s.move_by(5.0).unwrap();
        assert_eq!(pulse.rising_edges(), 200);
        assert!((moved - 5.0).abs() < 1e-9);
    }

    #[test]
    fn negative_travel_reverses_direction() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut s = screw(&pulse, &dir, 5.0);
        let moved = s.move_by(-2.5).unwrap();
        assert!((moved + 2.5).abs() < 1e-9);
        assert_eq!(dir.level(), Level::Low);
        assert_eq!(pulse.rising_edges(), 100);
    }

    #[test]
    fn rejects_nonpositive_linear_speed() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut s = screw(&pulse, &dir, 5.0);
        assert!(matches!(
            s.set_speed_mm_per_sec(0.0),
            Err(ControlError::InvalidSpeed { .. })
        ));
    }
}

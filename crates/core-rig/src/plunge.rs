//! Z-axis plunge drive. Unlike the leadscrew axis there is no step
//! counting here; the DC motor runs until a limit sensor trips, so the
//! axis only knows "at home", "at bottom", or "somewhere between".

use crate::dcmotor::DcMotor;
use crate::error::ControlError;
use crate::stepper::Direction;
use rig_io::SharedProximity;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Forward on the H-bridge drives the carriage down toward the bottom
/// sensor.
const DOWN: Direction = Direction::Forward;
const UP: Direction = Direction::Reverse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlungeConfig {
    pub speed_percent: f64,
    pub poll_interval_ms: u64,
    /// Bound on sensor polls for a blocking full-travel move.
    pub travel_timeout_polls: u32,
}

impl Default for PlungeConfig {
    fn default() -> Self {
        Self {
            speed_percent: 60.0,
            poll_interval_ms: 10,
            travel_timeout_polls: 6000,
        }
    }
}

pub struct PlungeAxis {
    motor: DcMotor,
    home: SharedProximity,
    bottom: SharedProximity,
    config: PlungeConfig,
}

impl PlungeAxis {
    pub fn new(
        motor: DcMotor,
        home: SharedProximity,
        bottom: SharedProximity,
        config: PlungeConfig,
    ) -> Result<Self, ControlError> {
        if !(config.speed_percent.is_finite() && config.speed_percent > 0.0) {
            return Err(ControlError::InvalidSpeed {
                value: config.speed_percent,
                reason: "plunge speed must be a positive duty percent",
            });
        }
        Ok(Self {
            motor,
            home,
            bottom,
            config,
        })
    }

    pub fn is_at_home(&self) -> Result<bool, ControlError> {
        Ok(self.home.is_triggered()?)
    }

    pub fn is_at_bottom(&self) -> Result<bool, ControlError> {
        Ok(self.bottom.is_triggered()?)
    }

    pub fn is_moving(&self) -> bool {
        self.motor.is_running()
    }

    /// Start driving down. The caller polls sensors and calls `halt`;
    /// used by the sequencer's weight-supervised descent.
    pub fn start_descent(&mut self) -> Result<(), ControlError> {
        self.motor.set_direction(DOWN)?;
        self.motor.set_speed_percent(self.config.speed_percent)?;
        self.motor.start()
    }

    pub fn start_retract(&mut self) -> Result<(), ControlError> {
        self.motor.set_direction(UP)?;
        self.motor.set_speed_percent(self.config.speed_percent)?;
        self.motor.start()
    }

    pub fn halt(&mut self) -> Result<(), ControlError> {
        self.motor.stop()
    }

    /// Retract until the home sensor trips. Blocking; the motor is
    /// stopped on every exit path.
    pub fn move_to_home(&mut self) -> Result<(), ControlError> {
        self.seek(UP, "plunge retract")
    }

    /// Descend until the bottom sensor trips. Blocking.
    pub fn move_to_bottom(&mut self) -> Result<(), ControlError> {
        self.seek(DOWN, "plunge descent")
    }

    fn limit_sensor(&self, direction: Direction) -> &SharedProximity {
        if direction == UP {
            &self.home
        } else {
            &self.bottom
        }
    }

    fn seek(&mut self, direction: Direction, operation: &'static str) -> Result<(), ControlError> {
        if self.limit_sensor(direction).is_triggered()? {
            return Ok(());
        }
        debug!(operation, "plunge seek started");

        self.motor.set_direction(direction)?;
        self.motor.set_speed_percent(self.config.speed_percent)?;
        self.motor.start()?;

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut result = Err(ControlError::Timeout { operation });
        for _ in 0..self.config.travel_timeout_polls {
            match self.limit_sensor(direction).is_triggered() {
                Ok(true) => {
                    result = Ok(());
                    break;
                }
                Ok(false) => thread::sleep(interval),
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }
        self.motor.stop()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_io::{Level, PwmOutput, SimLine, SimProximity, SimPwm};
    use std::sync::Arc;

    fn plunge(
        pwm: &SimPwm,
        home: &SimProximity,
        bottom: &SimProximity,
        timeout_polls: u32,
    ) -> PlungeAxis {
        let motor = DcMotor::new(
            Arc::new(pwm.clone()),
            Arc::new(SimLine::new(Level::Low)),
            Arc::new(SimLine::new(Level::Low)),
            1000.0,
        )
        .unwrap();
        let config = PlungeConfig {
            poll_interval_ms: 1,
            travel_timeout_polls: timeout_polls,
            ..PlungeConfig::default()
        };
        PlungeAxis::new(
            motor,
            Arc::new(home.clone()),
            Arc::new(bottom.clone()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn already_home_is_immediate() {
        let pwm = SimPwm::new();
        let home = SimProximity::new(true);
        let bottom = SimProximity::new(false);
        let mut axis = plunge(&pwm, &home, &bottom, 10);
        axis.move_to_home().unwrap();
        assert!(!pwm.is_running());
    }

    #[test]
    fn seek_stops_motor_when_sensor_trips() {
        let pwm = SimPwm::new();
        let home = SimProximity::new(false);
        let bottom = SimProximity::new(false);
        let mut axis = plunge(&pwm, &home, &bottom, 1000);
        let trip = bottom.clone();
        let watcher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trip.set_triggered(true);
        });
        axis.move_to_bottom().unwrap();
        watcher.join().unwrap();
        assert!(!pwm.is_running());
        assert!(axis.is_at_bottom().unwrap());
    }

    #[test]
    fn seek_times_out_and_halts() {
        let pwm = SimPwm::new();
        let home = SimProximity::new(false);
        let bottom = SimProximity::new(false);
        let mut axis = plunge(&pwm, &home, &bottom, 5);
        let err = axis.move_to_home();
        assert!(matches!(err, Err(ControlError::Timeout { .. })));
        assert!(!pwm.is_running());
    }
}

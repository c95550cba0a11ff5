//! Sensor-guided linear axis positioning.
//!
//! Open-loop step counting drifts, so each travel limit carries a
//! buffer zone: moves ending near a limit jump to the zone boundary,
//! then creep in small increments while polling the limit's proximity
//! sensor. A sensor trip re-anchors the position estimate, making the
//! physical reference authoritative over the kinematic one.

use crate::error::ControlError;
use crate::leadscrew::Leadscrew;
use rig_io::SharedProximity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const POSITION_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Travel length in mm; the end sensor sits at this position.
    pub length_mm: f64,
    /// Width of the sensor-checked zone at each travel limit.
    pub buffer_mm: f64,
    /// Increment for sensor-checked creeping inside a buffer zone.
    pub creep_mm: f64,
    /// Back-off applied after a sensor trip to sit just off the limit.
    pub trip_offset_mm: f64,
    pub speed_mm_per_sec: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            length_mm: 500.0,
            buffer_mm: 30.0,
            creep_mm: 3.0,
            trip_offset_mm: 0.0,
            speed_mm_per_sec: 10.0,
        }
    }
}

pub struct LinearAxis {
    name: &'static str,
    screw: Leadscrew,
    home: SharedProximity,
    end: Option<SharedProximity>,
    config: AxisConfig,
    /// Kinematic estimate; starts at the out-of-range sentinel
    /// `length + 1` until a sensor trip anchors it.
    position_mm: f64,
    calibrated: bool,
}

impl LinearAxis {
    pub fn new(
        name: &'static str,
        screw: Leadscrew,
        home: SharedProximity,
        end: Option<SharedProximity>,
        config: AxisConfig,
    ) -> Result<Self, ControlError> {
        if !(config.speed_mm_per_sec.is_finite() && config.speed_mm_per_sec > 0.0) {
            return Err(ControlError::InvalidSpeed {
                value: config.speed_mm_per_sec,
                reason: "axis speed must be a positive, finite mm/s",
            });
        }
        for (name, value) in [
            ("length_mm", config.length_mm),
            ("buffer_mm", config.buffer_mm),
            ("creep_mm", config.creep_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ControlError::InvalidParameter { name, value });
            }
        }
        if !(config.trip_offset_mm.is_finite() && config.trip_offset_mm >= 0.0) {
            return Err(ControlError::InvalidParameter {
                name: "trip_offset_mm",
                value: config.trip_offset_mm,
            });
        }
        let mut screw = screw;
        screw.set_speed_mm_per_sec(config.speed_mm_per_sec)?;
        let position_mm = config.length_mm + 1.0;
        Ok(Self {
            name,
            screw,
            home,
            end,
            config,
            position_mm,
            calibrated: false,
        })
    }

    pub fn position_mm(&self) -> f64 {
        self.position_mm
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn length_mm(&self) -> f64 {
        self.config.length_mm
    }

    pub fn set_speed_mm_per_sec(&mut self, mm_per_sec: f64) -> Result<(), ControlError> {
        self.screw.set_speed_mm_per_sec(mm_per_sec)?;
        self.config.speed_mm_per_sec = mm_per_sec;
        Ok(())
    }

    pub fn move_to_home(&mut self) -> Result<(), ControlError> {
        self.move_to(0.0)
    }

    pub fn move_to_end(&mut self) -> Result<(), ControlError> {
        self.move_to(self.config.length_mm)
    }

    pub fn move_by(&mut self, delta_mm: f64) -> Result<(), ControlError> {
        self.move_to(self.position_mm + delta_mm)
    }

    /// Move to an absolute position in [0, length].
    ///
    /// Targets inside a buffer zone are approached by creeping against
    /// the zone's sensor; a trip wins over the kinematic estimate and
    /// the call returns success with the position re-anchored, even if
    /// the exact target was not reached. Mid-range targets require a
    /// calibrated estimate and move in one unchecked motion.
    pub fn move_to(&mut self, target_mm: f64) -> Result<(), ControlError> {
        if !target_mm.is_finite()
            || target_mm < -POSITION_EPS
            || target_mm > self.config.length_mm + POSITION_EPS
        {
            return Err(ControlError::InvalidParameter {
                name: "target_mm",
                value: target_mm,
            });
        }
        debug!(
            axis = self.name,
            target_mm,
            position_mm = self.position_mm,
            calibrated = self.calibrated,
            "axis move"
        );

        if target_mm <= self.position_mm && target_mm <= self.config.buffer_mm + POSITION_EPS {
            return self.approach_home(target_mm);
        }
        if let Some(end) = self.end.clone() {
            if target_mm >= self.position_mm
                && target_mm >= self.config.length_mm - self.config.buffer_mm - POSITION_EPS
            {
                return self.approach_end(target_mm, &end);
            }
        }
        if !self.calibrated {
            return Err(ControlError::NotCalibrated);
        }
        self.screw.move_by(target_mm - self.position_mm)?;
        self.position_mm = target_mm;
        Ok(())
    }

    fn approach_home(&mut self, target_mm: f64) -> Result<(), ControlError> {
        let boundary = self.config.buffer_mm;
        if self.position_mm > boundary {
            self.screw.move_by(boundary - self.position_mm)?;
            self.position_mm = boundary;
        }
        loop {
            if self.home.is_triggered()? {
                if self.config.trip_offset_mm > 0.0 {
                    self.screw.move_by(self.config.trip_offset_mm)?;
                }
                self.position_mm = 0.0;
                self.calibrated = true;
                info!(axis = self.name, "home sensor tripped, position anchored");
                return Ok(());
            }
            if self.position_mm <= target_mm + POSITION_EPS {
                break;
            }
            let step = self.config.creep_mm.min(self.position_mm - target_mm);
            let moved = self.screw.move_by(-step)?;
            self.position_mm += moved;
        }
        self.position_mm = target_mm;
        Ok(())
    }

    fn approach_end(&mut self, target_mm: f64, end: &SharedProximity) -> Result<(), ControlError> {
        let boundary = self.config.length_mm - self.config.buffer_mm;
        if self.position_mm < boundary {
            self.screw.move_by(boundary - self.position_mm)?;
            self.position_mm = boundary;
        }
        loop {
            if end.is_triggered()? {
                if self.config.trip_offset_mm > 0.0 {
                    self.screw.move_by(-self.config.trip_offset_mm)?;
                }
                self.position_mm = self.config.length_mm;
                self.calibrated = true;
                info!(axis = self.name, "end sensor tripped, position anchored");
                return Ok(());
            }
            if self.position_mm >= target_mm - POSITION_EPS {
                break;
            }
            let step = self.config.creep_mm.min(target_mm - self.position_mm);
            let moved = self.screw.move_by(step)?;
            self.position_mm += moved;
        }
        self.position_mm = target_mm;
        Ok(())
    }
}

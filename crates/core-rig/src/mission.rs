//! Multi-hole mission sequencing.
//!
//! The sequencer owns every actuator and the relay bank, runs each
//! hole through a fixed phase list, and treats any relay failure as
//! fatal to the whole run: proceeding with actuators powered in an
//! unknown state is worse than abandoning the site. All blocking axis
//! motion happens on the sequencer's own thread; the drilling and
//! melting loops run in the background between their start/stop
//! phases.

use crate::axis::LinearAxis;
use crate::drilling::DrillingSystem;
use crate::error::{ControlError, MissionError};
use crate::melting::MeltingSystem;
use crate::plunge::PlungeAxis;
use crate::power::{Output, PowerController};
use rig_io::SharedLoadCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    EnergizeRelays,
    HomeAxes,
    CloseCap,
    PositionX,
    StartDrill,
    Descend,
    RetractAndPark,
    Transfer,
    Melt,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::EnergizeRelays => "relay energize",
            Phase::HomeAxes => "axis homing",
            Phase::CloseCap => "cap close",
            Phase::PositionX => "x positioning",
            Phase::StartDrill => "drill start",
            Phase::Descend => "drill descent",
            Phase::RetractAndPark => "retract and park",
            Phase::Transfer => "material transfer",
            Phase::Melt => "melt dwell",
            Phase::Shutdown => "relay shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub hole_diameter_mm: f64,
    pub hole_separation_mm: f64,
    /// Weight on bit above this is a stall/jam indication.
    pub wob_max_kg: f64,
    /// Weight on bit above this during transfer means the bit has met
    /// the material.
    pub wob_contact_min_kg: f64,
    /// Consecutive overweight polls before descent is abandoned.
    pub wob_timeout_polls: u32,
    pub wob_poll_interval_ms: u64,
    /// Hold the axis (rather than keep driving) while overweight.
    pub pause_on_overweight: bool,
    /// Poll bound for the material-contact wait during transfer.
    pub contact_timeout_polls: u32,
    pub transfer_hold_ms: u64,
    pub melt_dwell_ms: u64,
    /// Optional cap on how many of the generated hole sites to drill.
    pub max_holes: Option<usize>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            hole_diameter_mm: 25.0,
            hole_separation_mm: 50.0,
            wob_max_kg: 15.0,
            wob_contact_min_kg: 5.0,
            wob_timeout_polls: 50,
            wob_poll_interval_ms: 10,
            pause_on_overweight: true,
            contact_timeout_polls: 1000,
            transfer_hold_ms: 5000,
            melt_dwell_ms: 10_000,
            max_holes: None,
        }
    }
}

/// Target X positions, stepping from one hole diameter off the home
/// limit to one diameter off the far limit.
pub fn hole_positions(axis_length_mm: f64, config: &MissionConfig) -> Vec<f64> {
    // A non-positive step would never advance past the first site.
    if !(config.hole_separation_mm.is_finite() && config.hole_separation_mm > 0.0) {
        return Vec::new();
    }
    let mut positions = Vec::new();
    let limit = axis_length_mm - config.hole_diameter_mm;
    let mut x = config.hole_diameter_mm;
    while x <= limit + 1e-9 {
        positions.push(x);
        x += config.hole_separation_mm;
    }
    positions
}

/// Counts consecutive overweight polls; any acceptable sample resets
/// the count.
struct StallCounter {
    count: u32,
    limit: u32,
}

impl StallCounter {
    fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// Returns true once the limit is reached.
    fn observe(&mut self, overweight: bool) -> bool {
        if overweight {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.count >= self.limit
    }
}

#[derive(Debug, Clone, Default)]
pub struct MissionReport {
    pub holes_planned: usize,
    pub holes_completed: usize,
    pub elapsed: Duration,
}

pub struct MissionSequencer {
    power: Arc<PowerController>,
    x_axis: LinearAxis,
    z_axis: PlungeAxis,
    drill: DrillingSystem,
    melt: MeltingSystem,
    load_cell: SharedLoadCell,
    config: MissionConfig,
}

impl fmt::Debug for MissionSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MissionSequencer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MissionSequencer {
    /// The mission geometry and polling parameters are checked up
    /// front; a bad config is rejected before any relay is touched.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        power: Arc<PowerController>,
        x_axis: LinearAxis,
        z_axis: PlungeAxis,
        drill: DrillingSystem,
        melt: MeltingSystem,
        load_cell: SharedLoadCell,
        config: MissionConfig,
    ) -> Result<Self, ControlError> {
        for (name, value) in [
            ("hole_diameter_mm", config.hole_diameter_mm),
            ("hole_separation_mm", config.hole_separation_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ControlError::InvalidParameter { name, value });
            }
        }
        if config.wob_poll_interval_ms == 0 {
            return Err(ControlError::InvalidParameter {
                name: "wob_poll_interval_ms",
                value: 0.0,
            });
        }
        Ok(Self {
            power,
            x_axis,
            z_axis,
            drill,
            melt,
            load_cell,
            config,
        })
    }

    /// Run the full multi-hole cycle. On a fatal error the actuators
    /// are stopped and every relay is switched off before the error is
    /// returned with its phase and hole index.
    pub fn run(&mut self) -> Result<MissionReport, MissionError> {
        let started = Instant::now();
        let mut positions = hole_positions(self.x_axis.length_mm(), &self.config);
        if let Some(max) = self.config.max_holes {
            positions.truncate(max);
        }
        let mut report = MissionReport {
            holes_planned: positions.len(),
            ..MissionReport::default()
        };
        info!(holes = positions.len(), "mission starting");

        for (hole, &x) in positions.iter().enumerate() {
            info!(hole, x_mm = x, "hole cycle starting");
            if let Err(e) = self.drill_hole(hole, x) {
                self.abort_cleanup();
                return Err(e);
            }
            if let Err(source) = self.power.turn_off_all() {
                self.abort_cleanup();
                return Err(MissionError {
                    hole,
                    phase: Phase::Shutdown,
                    source,
                });
            }
            report.holes_completed += 1;
            info!(hole, "hole cycle complete");
        }

        report.elapsed = started.elapsed();
        info!(
            holes = report.holes_completed,
            elapsed_s = report.elapsed.as_secs_f64(),
            "mission complete"
        );
        Ok(report)
    }

    fn drill_hole(&mut self, hole: usize, x_mm: f64) -> Result<(), MissionError> {
        let fail = |phase: Phase| {
            move |source: ControlError| MissionError {
                hole,
                phase,
                source,
            }
        };

        self.power
            .turn_on(Output::Proximity)
            .map_err(fail(Phase::EnergizeRelays))?;
        self.power
            .turn_on(Output::MotorX)
            .map_err(fail(Phase::EnergizeRelays))?;
        self.power
            .turn_on(Output::MotorZ)
            .map_err(fail(Phase::EnergizeRelays))?;

        self.z_axis.move_to_home().map_err(fail(Phase::HomeAxes))?;
        self.x_axis.move_to_home().map_err(fail(Phase::HomeAxes))?;

        self.melt.close_cap().map_err(fail(Phase::CloseCap))?;

        self.x_axis.move_to(x_mm).map_err(fail(Phase::PositionX))?;

        self.power
            .turn_on(Output::Drill)
            .map_err(fail(Phase::StartDrill))?;
        self.drill.start().map_err(fail(Phase::StartDrill))?;

        if let Err(source) = self.supervised_descent() {
            warn!(hole, error = %source, "descent aborted, retracting");
            if let Err(e) = self.drill.stop() {
                warn!(error = %e, "drill stop failed during abort");
            }
            if let Err(e) = self.z_axis.move_to_home() {
                warn!(error = %e, "z retract failed during abort");
            }
            return Err(MissionError {
                hole,
                phase: Phase::Descend,
                source,
            });
        }

        self.drill.stop().map_err(fail(Phase::RetractAndPark))?;
        self.z_axis
            .move_to_home()
            .map_err(fail(Phase::RetractAndPark))?;
        self.x_axis
            .move_to_home()
            .map_err(fail(Phase::RetractAndPark))?;
        self.drill
            .rotate_to_index()
            .map_err(fail(Phase::RetractAndPark))?;
        self.power
            .turn_off(Output::Drill)
            .map_err(fail(Phase::RetractAndPark))?;

        self.melt.open_cap().map_err(fail(Phase::Transfer))?;
        self.contact_descent().map_err(fail(Phase::Transfer))?;
        thread::sleep(Duration::from_millis(self.config.transfer_hold_ms));
        self.z_axis.move_to_home().map_err(fail(Phase::Transfer))?;

        self.power
            .turn_off(Output::Proximity)
            .map_err(fail(Phase::Melt))?;
        self.power
            .turn_off(Output::MotorX)
            .map_err(fail(Phase::Melt))?;
        self.power
            .turn_off(Output::MotorZ)
            .map_err(fail(Phase::Melt))?;
        self.melt.start().map_err(fail(Phase::Melt))?;
        thread::sleep(Duration::from_millis(self.config.melt_dwell_ms));
        self.melt.stop().map_err(fail(Phase::Melt))?;

        Ok(())
    }

    /// Drive the bit down until the bottom sensor trips, supervising
    /// weight on bit. Overweight polls beyond the configured count
    /// abandon the descent with a `Timeout`; any acceptable sample
    /// resets the count.
    fn supervised_descent(&mut self) -> Result<(), ControlError> {
        let result = self.descent_poll_loop();
        let halted = self.z_axis.halt();
        result?;
        halted
    }

    fn descent_poll_loop(&mut self) -> Result<(), ControlError> {
        self.z_axis.start_descent()?;
        let interval = Duration::from_millis(self.config.wob_poll_interval_ms);
        let mut stall = StallCounter::new(self.config.wob_timeout_polls);
        loop {
            if self.z_axis.is_at_bottom()? {
                return Ok(());
            }
            let wob = self.load_cell.weight_kg()?;
            let overweight = wob > self.config.wob_max_kg;
            if overweight && self.config.pause_on_overweight && self.z_axis.is_moving() {
                self.z_axis.halt()?;
            } else if !overweight && !self.z_axis.is_moving() {
                self.z_axis.start_descent()?;
            }
            if stall.observe(overweight) {
                return Err(ControlError::Timeout {
                    operation: "drill descent",
                });
            }
            thread::sleep(interval);
        }
    }

    /// Lower the bit until weight on bit shows material contact (or
    /// the bottom sensor trips first).
    fn contact_descent(&mut self) -> Result<(), ControlError> {
        let result = self.contact_poll_loop();
        let halted = self.z_axis.halt();
        result?;
        halted
    }

    fn contact_poll_loop(&mut self) -> Result<(), ControlError> {
        self.z_axis.start_descent()?;
        let interval = Duration::from_millis(self.config.wob_poll_interval_ms);
        for _ in 0..self.config.contact_timeout_polls {
            if self.z_axis.is_at_bottom()? {
                return Ok(());
            }
            if self.load_cell.weight_kg()? > self.config.wob_contact_min_kg {
                return Ok(());
            }
            thread::sleep(interval);
        }
        Err(ControlError::Timeout {
            operation: "material contact",
        })
    }

    /// Best-effort shutdown on a fatal error: stop the loops, stop the
    /// plunge motor, and force every relay off.
    fn abort_cleanup(&mut self) {
        if self.drill.is_running() {
            if let Err(e) = self.drill.stop() {
                warn!(error = %e, "drill stop failed during cleanup");
            }
        }
        if self.melt.is_running() {
            if let Err(e) = self.melt.stop() {
                warn!(error = %e, "melt stop failed during cleanup");
            }
        }
        if let Err(e) = self.z_axis.halt() {
            warn!(error = %e, "plunge halt failed during cleanup");
        }
        if let Err(e) = self.power.turn_off_all() {
            warn!(error = %e, "relays not fully off after abort");
        }
    }
}

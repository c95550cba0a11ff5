use crate::runtime::config::{RigConfig, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use core_rig::{
    CapServo, DcMotor, DrillingSystem, Leadscrew, LinearAxis, MeltingSystem, MissionSequencer,
    PlungeAxis, PowerController, RelayBank, StepperMotor, TelemetrySampler,
};
use rig_io::{Level, RatioCurrentSensor, SimLine, SimRig, SimRigConfig};
use std::sync::Arc;
use tracing::{error, info};

/// Steps per revolution of the X-axis stepper.
const X_STEPS_PER_REV: u32 = 200;
/// X leadscrew pitch in mm per revolution.
const X_PITCH_MM: f64 = 2.0;
/// Drill current sensor full-scale range in amps.
const CURRENT_RANGE_AMPS: f64 = 16.0;
const TELEMETRY_PERIOD_MS: u64 = 250;

pub fn run_from_args() -> i32 {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return 0;
    }
    run(config)
}

pub fn run(runtime: RuntimeConfig) -> i32 {
    let _log_guard = init_tracing(runtime.json_logs, runtime.datalog_dir.as_deref());

    let mut rig_config = match &runtime.config_path {
        Some(path) => match RigConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("{e}");
                return 2;
            }
        },
        None => RigConfig::default(),
    };
    if let Some(max) = runtime.max_holes {
        rig_config.mission.max_holes = Some(max);
    }
    if runtime.drive_on_overweight {
        rig_config.mission.pause_on_overweight = false;
    }

    let rig = SimRig::spawn(SimRigConfig {
        x_length_mm: rig_config.x_axis.length_mm,
        ..SimRigConfig::default()
    });

    let mut sequencer = match build_sequencer(&rig, &rig_config) {
        Ok(sequencer) => sequencer,
        Err(e) => {
            error!(error = %e, "rig construction failed");
            return 2;
        }
    };

    let mut telemetry = build_telemetry(&rig);
    if let Err(e) = telemetry.start() {
        error!(error = %e, "telemetry sampler failed to start");
        return 2;
    }

    info!("rig-ctl running against the simulated rig");
    let exit = match sequencer.run() {
        Ok(report) => {
            info!(
                holes_planned = report.holes_planned,
                holes_completed = report.holes_completed,
                elapsed_s = report.elapsed.as_secs_f64(),
                "mission finished"
            );
            0
        }
        Err(e) => {
            error!(hole = e.hole, phase = %e.phase, error = %e.source, "mission failed");
            1
        }
    };

    if let Err(e) = telemetry.stop() {
        error!(error = %e, "telemetry sampler did not stop cleanly");
    }
    exit
}

fn build_sequencer(
    rig: &SimRig,
    config: &RigConfig,
) -> Result<MissionSequencer, core_rig::ControlError> {
    let h = rig.handles();

    let power = Arc::new(PowerController::new(RelayBank {
        chiller: Arc::new(h.relay_chiller.clone()),
        heater_a: Arc::new(h.relay_heater_a.clone()),
        heater_b: Arc::new(h.relay_heater_b.clone()),
        drill: Arc::new(h.relay_drill.clone()),
        proximity: Arc::new(h.relay_proximity.clone()),
        motor_x: Arc::new(h.relay_motor_x.clone()),
        motor_z: Arc::new(h.relay_motor_z.clone()),
    })?);

    let x_sleep: rig_io::SharedOutput = Arc::new(h.x_sleep.clone());
    let x_motor = StepperMotor::new(
        Arc::new(h.x_pulse.clone()),
        Arc::new(h.x_dir.clone()),
        Some(x_sleep),
        60.0,
        X_STEPS_PER_REV,
    )?;
    let x_screw = Leadscrew::new(x_motor, X_PITCH_MM)?;
    let x_axis = LinearAxis::new(
        "x",
        x_screw,
        Arc::new(h.x_home.clone()),
        None,
        config.x_axis.clone(),
    )?;

    let z_motor = DcMotor::new(
        Arc::new(h.z_pwm.clone()),
        Arc::new(h.z_in1.clone()),
        Arc::new(h.z_in2.clone()),
        1000.0,
    )?;
    let z_axis = PlungeAxis::new(
        z_motor,
        Arc::new(h.z_home.clone()),
        Arc::new(h.z_bottom.clone()),
        config.plunge.clone(),
    )?;

    // The simulated drill spindle is single-direction; its H-bridge
    // lines are stubs.
    let drill_motor = DcMotor::new(
        Arc::new(h.drill_pwm.clone()),
        Arc::new(SimLine::new(Level::Low)),
        Arc::new(SimLine::new(Level::Low)),
        config.drill.pwm_frequency_hz,
    )?;
    let drill = DrillingSystem::new(
        drill_motor,
        rig.encoder(),
        Arc::new(h.drill_index.clone()),
        Arc::new(RatioCurrentSensor::new(
            Arc::new(h.drill_current.clone()),
            0.0,
            CURRENT_RANGE_AMPS,
            4,
        )),
        config.drill.clone(),
    )?;

    let servo = CapServo::new(Arc::new(h.cap_pwm.clone()))?;
    let melt = MeltingSystem::new(
        Arc::clone(&power),
        Arc::new(h.thermometer.clone()),
        servo,
        config.melt.clone(),
    )?;

    MissionSequencer::new(
        power,
        x_axis,
        z_axis,
        drill,
        melt,
        Arc::new(h.load_cell.clone()),
        config.mission.clone(),
    )
}

fn build_telemetry(rig: &SimRig) -> TelemetrySampler {
    let h = rig.handles();
    TelemetrySampler::new(
        Arc::new(RatioCurrentSensor::new(
            Arc::new(h.drill_current.clone()),
            0.0,
            CURRENT_RANGE_AMPS,
            4,
        )),
        Arc::new(h.load_cell.clone()),
        Arc::new(h.thermometer.clone()),
        TELEMETRY_PERIOD_MS,
    )
}

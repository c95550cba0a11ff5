//! End-to-end mission runs against the physics-backed simulated rig.

use core_rig::{
    AxisConfig, CapServo, DcMotor, DrillConfig, Leadscrew, LinearAxis, MeltConfig, MeltingSystem,
    MissionConfig, MissionSequencer, Phase, PlungeAxis, PlungeConfig, PowerController, RelayBank,
    StepperMotor,
};
use core_rig::DrillingSystem;
use rig_io::{RatioCurrentSensor, SimLine, SimRig, SimRigConfig};
use rig_io::Level;
use std::sync::Arc;

fn rig_config() -> SimRigConfig {
    SimRigConfig {
        x_length_mm: 60.0,
        z_length_mm: 20.0,
        x_steps_per_mm: 100.0,
        z_speed_mm_per_s: 200.0,
        contact_depth_mm: 10.0,
        contact_weight_kg: 6.0,
        ..SimRigConfig::default()
    }
}

fn mission_config() -> MissionConfig {
    MissionConfig {
        hole_diameter_mm: 20.0,
        hole_separation_mm: 50.0,
        wob_max_kg: 15.0,
        wob_contact_min_kg: 5.0,
        wob_timeout_polls: 40,
        wob_poll_interval_ms: 5,
        pause_on_overweight: true,
        contact_timeout_polls: 2000,
        transfer_hold_ms: 50,
        melt_dwell_ms: 200,
        max_holes: None,
    }
}

fn build_sequencer(rig: &SimRig) -> MissionSequencer {
    build_sequencer_with(rig, mission_config()).unwrap()
}

fn build_sequencer_with(
    rig: &SimRig,
    mission: MissionConfig,
) -> Result<MissionSequencer, core_rig::ControlError> {
    let h = rig.handles();

    let power = Arc::new(
        PowerController::new(RelayBank {
            chiller: Arc::new(h.relay_chiller.clone()),
            heater_a: Arc::new(h.relay_heater_a.clone()),
            heater_b: Arc::new(h.relay_heater_b.clone()),
            drill: Arc::new(h.relay_drill.clone()),
            proximity: Arc::new(h.relay_proximity.clone()),
            motor_x: Arc::new(h.relay_motor_x.clone()),
            motor_z: Arc::new(h.relay_motor_z.clone()),
        })
        .unwrap(),
    );

    // X axis: 200-step motor on a 2 mm pitch screw, 100 steps/mm.
    let x_sleep: rig_io::SharedOutput = Arc::new(h.x_sleep.clone());
    let x_motor = StepperMotor::new(
        Arc::new(h.x_pulse.clone()),
        Arc::new(h.x_dir.clone()),
        Some(x_sleep),
        60.0,
        200,
    )
    .unwrap();
    let x_screw = Leadscrew::new(x_motor, 2.0).unwrap();
    let x_axis = LinearAxis::new(
        "x",
        x_screw,
        Arc::new(h.x_home.clone()),
        None,
        AxisConfig {
            length_mm: 60.0,
            buffer_mm: 10.0,
            creep_mm: 2.0,
            trip_offset_mm: 0.0,
            speed_mm_per_sec: 100.0,
        },
    )
    .unwrap();

    let z_motor = DcMotor::new(
        Arc::new(h.z_pwm.clone()),
        Arc::new(h.z_in1.clone()),
        Arc::new(h.z_in2.clone()),
        1000.0,
    )
    .unwrap();
    let z_axis = PlungeAxis::new(
        z_motor,
        Arc::new(h.z_home.clone()),
        Arc::new(h.z_bottom.clone()),
        PlungeConfig {
            speed_percent: 60.0,
            poll_interval_ms: 5,
            travel_timeout_polls: 2000,
        },
    )
    .unwrap();

    let drill_motor = DcMotor::new(
        Arc::new(h.drill_pwm.clone()),
        Arc::new(SimLine::new(Level::Low)),
        Arc::new(SimLine::new(Level::Low)),
        1000.0,
    )
    .unwrap();
    let drill = DrillingSystem::new(
        drill_motor,
        rig.encoder(),
        Arc::new(h.drill_index.clone()),
        Arc::new(RatioCurrentSensor::new(
            Arc::new(h.drill_current.clone()),
            0.0,
            16.0,
            4,
        )),
        DrillConfig {
            period_ms: 20,
            edge_wait_ms: 20,
            index_timeout_ms: 2000,
            ..DrillConfig::default()
        },
    )
    .unwrap();

    let servo = CapServo::new(Arc::new(h.cap_pwm.clone())).unwrap();
    let melt = MeltingSystem::new(
        Arc::clone(&power),
        Arc::new(h.thermometer.clone()),
        servo,
        MeltConfig {
            period_ms: 20,
            ..MeltConfig::default()
        },
    )
    .unwrap();

    MissionSequencer::new(
        power,
        x_axis,
        z_axis,
        drill,
        melt,
        Arc::new(h.load_cell.clone()),
        mission,
    )
}

fn all_relays_off(rig: &SimRig) -> bool {
    let h = rig.handles();
    !(h.relay_chiller.is_on()
        || h.relay_heater_a.is_on()
        || h.relay_heater_b.is_on()
        || h.relay_drill.is_on()
        || h.relay_proximity.is_on()
        || h.relay_motor_x.is_on()
        || h.relay_motor_z.is_on())
}

#[test]
fn zero_hole_separation_is_rejected_up_front() {
    let rig = SimRig::spawn(rig_config());
    let err = build_sequencer_with(
        &rig,
        MissionConfig {
            hole_separation_mm: 0.0,
            ..mission_config()
        },
    )
    .expect_err("a non-advancing hole grid must not construct");
    assert!(matches!(
        err,
        core_rig::ControlError::InvalidParameter { .. }
    ));
}

#[test]
fn single_hole_mission_completes_and_powers_down() {
    let rig = SimRig::spawn(rig_config());
    let mut sequencer = build_sequencer(&rig);

    let report = sequencer.run().expect("mission should complete");
    assert_eq!(report.holes_planned, 1);
    assert_eq!(report.holes_completed, 1);
    assert!(all_relays_off(&rig));
}

#[test]
fn stalled_descent_aborts_with_phase_and_powers_down() {
    let rig = SimRig::spawn(rig_config());
    // Pin weight on bit far over the stall limit for the whole run.
    rig.force_weight_on_bit(Some(50.0));
    let mut sequencer = build_sequencer(&rig);

    let err = sequencer.run().expect_err("descent should stall out");
    assert_eq!(err.hole, 0);
    assert_eq!(err.phase, Phase::Descend);
    assert!(matches!(
        err.source,
        core_rig::ControlError::Timeout { .. }
    ));
    assert!(all_relays_off(&rig));
}

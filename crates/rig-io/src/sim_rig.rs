//! Physics-backed simulated rig: one background thread integrates
//! axis positions from the motor lines, generates encoder pulses and
//! sensor values, and trips the proximity sensors at the travel
//! limits. Used by the runtime binary and the integration tests.

use crate::io::{Level, PwmOutput};
use crate::sim::{
    SimAnalog, SimEdge, SimEdgePulser, SimLine, SimLoadCell, SimProximity, SimPwm, SimRelay,
    SimThermometer,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SimRigConfig {
    pub x_length_mm: f64,
    pub z_length_mm: f64,
    /// Step pulses per millimeter of X travel.
    pub x_steps_per_mm: f64,
    /// Z travel speed while the plunge motor is driven.
    pub z_speed_mm_per_s: f64,
    /// Depth past which the bit contacts material and weight on bit
    /// appears.
    pub contact_depth_mm: f64,
    pub contact_weight_kg: f64,
    /// Spindle RPM per percent of drill duty cycle.
    pub rpm_per_duty_percent: f64,
    pub encoder_pulses_per_rev: f64,
    pub heater_ramp_c_per_s: f64,
    pub ambient_c: f64,
    pub tick: Duration,
}

impl Default for SimRigConfig {
    fn default() -> Self {
        Self {
            x_length_mm: 500.0,
            z_length_mm: 300.0,
            x_steps_per_mm: 100.0,
            z_speed_mm_per_s: 20.0,
            contact_depth_mm: 200.0,
            contact_weight_kg: 5.0,
            rpm_per_duty_percent: 2.0,
            encoder_pulses_per_rev: 256.0,
            heater_ramp_c_per_s: 40.0,
            ambient_c: -20.0,
            tick: Duration::from_millis(2),
        }
    }
}

/// Every peripheral handle the rig exposes to the control layer.
#[derive(Clone)]
pub struct SimRigHandles {
    pub x_pulse: SimLine,
    pub x_dir: SimLine,
    pub x_sleep: SimLine,
    pub x_home: SimProximity,

    pub z_pwm: SimPwm,
    pub z_in1: SimLine,
    pub z_in2: SimLine,
    pub z_home: SimProximity,
    pub z_bottom: SimProximity,

    pub drill_pwm: SimPwm,
    pub drill_index: SimLine,
    pub drill_current: SimAnalog,

    pub cap_pwm: SimPwm,
    pub thermometer: SimThermometer,
    pub load_cell: SimLoadCell,

    pub relay_chiller: SimRelay,
    pub relay_heater_a: SimRelay,
    pub relay_heater_b: SimRelay,
    pub relay_drill: SimRelay,
    pub relay_proximity: SimRelay,
    pub relay_motor_x: SimRelay,
    pub relay_motor_z: SimRelay,
}

impl SimRigHandles {
    fn new() -> Self {
        Self {
            x_pulse: SimLine::new(Level::Low),
            x_dir: SimLine::new(Level::Low),
            x_sleep: SimLine::new(Level::Low),
            x_home: SimProximity::new(false),
            z_pwm: SimPwm::new(),
            z_in1: SimLine::new(Level::Low),
            z_in2: SimLine::new(Level::Low),
            z_home: SimProximity::new(false),
            z_bottom: SimProximity::new(false),
            drill_pwm: SimPwm::new(),
            drill_index: SimLine::new(Level::Low),
            drill_current: SimAnalog::new(0.0),
            cap_pwm: SimPwm::new(),
            thermometer: SimThermometer::new(-20.0),
            load_cell: SimLoadCell::new(0.0),
            relay_chiller: SimRelay::new(),
            relay_heater_a: SimRelay::new(),
            relay_heater_b: SimRelay::new(),
            relay_drill: SimRelay::new(),
            relay_proximity: SimRelay::new(),
            relay_motor_x: SimRelay::new(),
            relay_motor_z: SimRelay::new(),
        }
    }
}

/// The simulated rig. Owns the physics thread; dropping it stops the
/// thread.
pub struct SimRig {
    handles: SimRigHandles,
    encoder: Arc<SimEdge>,
    wob_override: Arc<Mutex<Option<f64>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimRig {
    pub fn spawn(config: SimRigConfig) -> Self {
        let handles = SimRigHandles::new();
        let encoder = Arc::new(SimEdge::new());
        let wob_override = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let h = handles.clone();
            let pulser = encoder.pulser();
            let wob = Arc::clone(&wob_override);
            let stop = Arc::clone(&stop);
            thread::spawn(move || physics_loop(config, h, pulser, wob, &stop))
        };

        Self {
            handles,
            encoder,
            wob_override,
            stop,
            worker: Some(worker),
        }
    }

    pub fn handles(&self) -> &SimRigHandles {
        &self.handles
    }

    /// Encoder channel A, consumed by the drilling loop.
    pub fn encoder(&self) -> Arc<SimEdge> {
        Arc::clone(&self.encoder)
    }

    /// Pin weight on bit to a fixed value, bypassing the contact
    /// model. `None` restores the model.
    pub fn force_weight_on_bit(&self, kg: Option<f64>) {
        *self.wob_override.lock().unwrap() = kg;
    }
}

impl Drop for SimRig {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn physics_loop(
    config: SimRigConfig,
    h: SimRigHandles,
    encoder: SimEdgePulser,
    wob_override: Arc<Mutex<Option<f64>>>,
    stop: &AtomicBool,
) {
    let dt = config.tick.as_secs_f64();
    let mut x_pos = 0.0f64;
    let mut z_pos = 0.0f64;
    let mut rpm = 0.0f64;
    let mut pulse_accum = 0.0f64;
    let mut spin_time = 0.0f64;
    let mut temp_c = config.ambient_c;
    let mut last_x_edges = h.x_pulse.rising_edges();

    debug!("sim rig physics thread running");
    while !stop.load(Ordering::Relaxed) {
        // X axis: integrate step pulses, signed by the direction line.
        let edges = h.x_pulse.rising_edges();
        let steps = edges.saturating_sub(last_x_edges) as f64;
        last_x_edges = edges;
        if h.relay_motor_x.is_on() {
            let sign = if h.x_dir.level() == Level::High { 1.0 } else { -1.0 };
            x_pos = (x_pos + sign * steps / config.x_steps_per_mm).clamp(0.0, config.x_length_mm);
        }

        // Z axis: constant-speed travel while driven.
        if h.relay_motor_z.is_on() && h.z_pwm.is_running() {
            let down = h.z_in1.level() == Level::High && h.z_in2.level() == Level::Low;
            let sign = if down { 1.0 } else { -1.0 };
            z_pos = (z_pos + sign * config.z_speed_mm_per_s * dt).clamp(0.0, config.z_length_mm);
        }

        // Proximity sensors are powered through their relay.
        let prox_on = h.relay_proximity.is_on();
        h.x_home.set_triggered(prox_on && x_pos <= 0.25);
        h.z_home.set_triggered(prox_on && z_pos <= 0.25);
        h.z_bottom.set_triggered(prox_on && z_pos >= config.z_length_mm - 0.25);

        // Drill spindle: first-order speed response, encoder pulses,
        // index mark after the first few revolutions.
        if h.relay_drill.is_on() && h.drill_pwm.is_running() {
            let target = h.drill_pwm.duty_percent() * config.rpm_per_duty_percent;
            rpm += (target - rpm) * (dt * 5.0).min(1.0);
            spin_time += dt;
            pulse_accum += rpm / 60.0 * dt * config.encoder_pulses_per_rev;
            while pulse_accum >= 1.0 {
                encoder.pulse();
                pulse_accum -= 1.0;
            }
            h.drill_index.set(if spin_time > 0.02 { Level::High } else { Level::Low });
            h.drill_current.set_ratio(0.1 + h.drill_pwm.duty_percent() / 100.0 * 0.5);
        } else {
            rpm = 0.0;
            spin_time = 0.0;
            h.drill_index.set(Level::Low);
            h.drill_current.set_ratio(0.0);
        }

        // Weight on bit: contact model unless overridden.
        let wob = match *wob_override.lock().unwrap() {
            Some(kg) => kg,
            None => {
                if z_pos > config.contact_depth_mm {
                    config.contact_weight_kg + 0.1 * (z_pos - config.contact_depth_mm)
                } else {
                    0.0
                }
            }
        };
        h.load_cell.set_weight(wob);

        // Melt chamber temperature.
        let heating = h.relay_heater_a.is_on() && h.relay_heater_b.is_on();
        if heating {
            temp_c += config.heater_ramp_c_per_s * dt;
        } else {
            temp_c += (config.ambient_c - temp_c) * (dt * 0.2).min(1.0);
        }
        h.thermometer.set_temp(temp_c);

        thread::sleep(config.tick);
    }
}

//! Drill speed/torque regulation.
//!
//! Two background tasks cooperate: the speed estimator times rising
//! encoder edges into an RPM figure, and the regulation loop converts
//! electrical power draw into shaft torque and nudges the motor duty
//! cycle to keep torque inside a target band. Bang-bang steps rather
//! than PID; the cuttings column responds slowly enough that the
//! resulting oscillation is harmless.

use crate::cancel::CancelToken;
use crate::dcmotor::DcMotor;
use crate::error::ControlError;
use rig_io::{EdgeWait, Level, SharedCurrentSensor, SharedEdge, SharedInput};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    /// Supply voltage used in the electrical torque estimate.
    pub voltage: f64,
    pub speed_min_percent: f64,
    pub speed_max_percent: f64,
    pub speed_step_percent: f64,
    pub torque_min_nm: f64,
    pub torque_max_nm: f64,
    pub period_ms: u64,
    pub pulses_per_revolution: u32,
    /// Encoder wait slice; also bounds how fast the estimator notices
    /// cancellation.
    pub edge_wait_ms: u64,
    /// Consecutive I/O failures tolerated before a loop stops itself.
    pub max_io_failures: u32,
    pub index_timeout_ms: u64,
    pub pwm_frequency_hz: f64,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            voltage: 90.0,
            speed_min_percent: 5.0,
            speed_max_percent: 50.0,
            speed_step_percent: 5.0,
            torque_min_nm: 8.0,
            torque_max_nm: 10.0,
            period_ms: 100,
            pulses_per_revolution: 256,
            edge_wait_ms: 100,
            max_io_failures: 5,
            index_timeout_ms: 10_000,
            pwm_frequency_hz: 1000.0,
        }
    }
}

/// Shaft torque from electrical power: P = V*I, w = rpm * pi/30, and
/// T = P/w. Undefined until the shaft is actually turning.
pub fn torque_nm(voltage: f64, current_amps: f64, rpm: f64) -> Option<f64> {
    if rpm <= 0.0 || !rpm.is_finite() {
        return None;
    }
    Some((voltage * current_amps) / (rpm * PI / 30.0))
}

/// One bang-bang regulation step: below the band steps the duty cycle
/// up, above it steps down, inside it holds. Output never leaves
/// [speed_min, speed_max].
pub fn next_speed(current_percent: f64, torque: f64, config: &DrillConfig) -> f64 {
    if torque < config.torque_min_nm {
        (current_percent + config.speed_step_percent).min(config.speed_max_percent)
    } else if torque > config.torque_max_nm {
        (current_percent - config.speed_step_percent).max(config.speed_min_percent)
    } else {
        current_percent
    }
}

/// Times rising encoder edges into RPM. The first edge after a reset
/// only establishes a baseline timestamp; no rate is derived from it.
pub struct SpeedEstimator {
    pulses_per_revolution: u32,
    last_edge: Option<Instant>,
    rpm: Option<f64>,
}

impl SpeedEstimator {
    pub fn new(pulses_per_revolution: u32) -> Self {
        Self {
            pulses_per_revolution,
            last_edge: None,
            rpm: None,
        }
    }

    pub fn record_edge(&mut self, at: Instant) -> Option<f64> {
        if let Some(prev) = self.last_edge {
            let sec_per_rev =
                (at - prev).as_secs_f64() * f64::from(self.pulses_per_revolution);
            if sec_per_rev > 0.0 {
                self.rpm = Some(60.0 / sec_per_rev);
            }
        }
        self.last_edge = Some(at);
        self.rpm
    }

    pub fn rpm(&self) -> Option<f64> {
        self.rpm
    }

    pub fn reset(&mut self) {
        self.last_edge = None;
        self.rpm = None;
    }
}

// Published RPM cell: f64 bits, NaN meaning "no sample yet".
fn publish_rpm(cell: &AtomicU64, rpm: Option<f64>) {
    cell.store(rpm.unwrap_or(f64::NAN).to_bits(), Ordering::Relaxed);
}

fn load_rpm(cell: &AtomicU64) -> Option<f64> {
    let value = f64::from_bits(cell.load(Ordering::Relaxed));
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

pub struct DrillingSystem {
    motor: Arc<Mutex<DcMotor>>,
    encoder: SharedEdge,
    index: SharedInput,
    current: SharedCurrentSensor,
    config: DrillConfig,
    rpm_cell: Arc<AtomicU64>,
    estimator_cancel: Arc<CancelToken>,
    regulation_cancel: Arc<CancelToken>,
    estimator: Option<JoinHandle<()>>,
    regulation: Option<JoinHandle<()>>,
}

impl DrillingSystem {
    pub fn new(
        motor: DcMotor,
        encoder: SharedEdge,
        index: SharedInput,
        current: SharedCurrentSensor,
        config: DrillConfig,
    ) -> Result<Self, ControlError> {
        if config.speed_min_percent > config.speed_max_percent {
            return Err(ControlError::InvalidSpeed {
                value: config.speed_min_percent,
                reason: "speed_min_percent exceeds speed_max_percent",
            });
        }
        let rpm_cell = Arc::new(AtomicU64::new(0));
        publish_rpm(&rpm_cell, None);
        Ok(Self {
            motor: Arc::new(Mutex::new(motor)),
            encoder,
            index,
            current,
            config,
            rpm_cell,
            estimator_cancel: CancelToken::new(),
            regulation_cancel: CancelToken::new(),
            estimator: None,
            regulation: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.regulation.is_some()
    }

    /// Latest encoder-derived RPM; `None` until two edges have been
    /// timed since the last start.
    pub fn rpm(&self) -> Option<f64> {
        load_rpm(&self.rpm_cell)
    }

    /// Torque from the latest RPM and a fresh current reading.
    pub fn torque(&self) -> Result<Option<f64>, ControlError> {
        let Some(rpm) = self.rpm() else {
            return Ok(None);
        };
        let amps = self.current.current_amps()?;
        Ok(torque_nm(self.config.voltage, amps, rpm))
    }

    pub fn speed_percent(&self) -> f64 {
        self.motor.lock().unwrap().speed_percent()
    }

    /// Arm the estimator, start the motor at minimum speed, and launch
    /// the regulation loop.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.estimator.is_some() || self.regulation.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        publish_rpm(&self.rpm_cell, None);
        {
            let mut motor = self.motor.lock().unwrap();
            motor.set_speed_percent(self.config.speed_min_percent)?;
            motor.start()?;
        }

        self.estimator_cancel.reset();
        self.regulation_cancel.reset();

        let estimator = self.spawn_estimator();
        let estimator = match estimator {
            Ok(handle) => handle,
            Err(e) => {
                self.estimator_cancel.request();
                self.regulation_cancel.request();
                let _ = self.motor.lock().unwrap().stop();
                return Err(e);
            }
        };
        match self.spawn_regulation() {
            Ok(handle) => {
                self.estimator = Some(estimator);
                self.regulation = Some(handle);
                info!("drilling regulation started");
                Ok(())
            }
            Err(e) => {
                self.estimator_cancel.request();
                self.regulation_cancel.request();
                let _ = estimator.join();
                let _ = self.motor.lock().unwrap().stop();
                Err(e)
            }
        }
    }

    /// Cancel and join both loops, stop the motor, and clear the
    /// estimator baseline.
    pub fn stop(&mut self) -> Result<(), ControlError> {
        if self.estimator.is_none() && self.regulation.is_none() {
            return Err(ControlError::NotRunning);
        }
        self.estimator_cancel.request();
        self.regulation_cancel.request();
        let mut panicked = false;
        if let Some(handle) = self.regulation.take() {
            panicked |= handle.join().is_err();
        }
        if let Some(handle) = self.estimator.take() {
            panicked |= handle.join().is_err();
        }
        publish_rpm(&self.rpm_cell, None);
        self.motor.lock().unwrap().stop()?;
        if panicked {
            return Err(ControlError::WorkerPanicked);
        }
        info!("drilling regulation stopped");
        Ok(())
    }

    /// Spin at minimum speed until the index mark trips, parking the
    /// drill at its angular reference. Blocking.
    pub fn rotate_to_index(&mut self) -> Result<(), ControlError> {
        if self.estimator.is_some() || self.regulation.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        {
            let mut motor = self.motor.lock().unwrap();
            motor.set_speed_percent(self.config.speed_min_percent)?;
            motor.start()?;
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.index_timeout_ms);
        let mut result = Ok(());
        loop {
            match self.index.read() {
                Ok(Level::High) => break,
                Ok(Level::Low) => {
                    if Instant::now() >= deadline {
                        result = Err(ControlError::Timeout {
                            operation: "rotate to index",
                        });
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }
        self.motor.lock().unwrap().stop()?;
        result
    }

    fn spawn_estimator(&self) -> Result<JoinHandle<()>, ControlError> {
        let encoder = Arc::clone(&self.encoder);
        let cancel = Arc::clone(&self.estimator_cancel);
        let rpm_cell = Arc::clone(&self.rpm_cell);
        let wait = Duration::from_millis(self.config.edge_wait_ms);
        let max_failures = self.config.max_io_failures;
        let pulses = self.config.pulses_per_revolution;
        thread::Builder::new()
            .name("drill-speed-estimator".into())
            .spawn(move || {
                let mut estimator = SpeedEstimator::new(pulses);
                let mut failures = 0u32;
                while !cancel.is_requested() {
                    match encoder.wait_rising(wait) {
                        Ok(EdgeWait::Edge) => {
                            failures = 0;
                            publish_rpm(&rpm_cell, estimator.record_edge(Instant::now()));
                        }
                        Ok(EdgeWait::TimedOut) => failures = 0,
                        Err(e) => {
                            failures += 1;
                            warn!(error = %e, failures, "encoder read failed");
                            if failures > max_failures {
                                error!("encoder unresponsive, estimator stopping");
                                break;
                            }
                        }
                    }
                }
            })
            .map_err(|e| ControlError::StartFailure(e.to_string()))
    }

    fn spawn_regulation(&self) -> Result<JoinHandle<()>, ControlError> {
        let motor = Arc::clone(&self.motor);
        let current = Arc::clone(&self.current);
        let cancel = Arc::clone(&self.regulation_cancel);
        let rpm_cell = Arc::clone(&self.rpm_cell);
        let config = self.config.clone();
        let period = Duration::from_millis(config.period_ms);
        thread::Builder::new()
            .name("drill-regulation".into())
            .spawn(move || {
                let mut failures = 0u32;
                while !cancel.is_requested() {
                    thread::sleep(period);
                    if cancel.is_requested() {
                        break;
                    }
                    let amps = match current.current_amps() {
                        Ok(amps) => {
                            failures = 0;
                            amps
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(error = %e, failures, "current read failed");
                            if failures > config.max_io_failures {
                                error!("current sensor unresponsive, regulation stopping");
                                break;
                            }
                            continue;
                        }
                    };
                    // Hold until the estimator has a real RPM figure;
                    // regulating against nothing would divide by zero.
                    let Some(torque) =
                        load_rpm(&rpm_cell).and_then(|rpm| torque_nm(config.voltage, amps, rpm))
                    else {
                        continue;
                    };
                    let mut motor = motor.lock().unwrap();
                    let speed = motor.speed_percent();
                    let target = next_speed(speed, torque, &config);
                    trace!(torque_nm = torque, speed, target, "regulation step");
                    if (target - speed).abs() > f64::EPSILON {
                        if let Err(e) = motor.set_speed_percent(target) {
                            error!(error = %e, "speed write failed, regulation stopping");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| ControlError::StartFailure(e.to_string()))
    }
}

impl Drop for DrillingSystem {
    fn drop(&mut self) {
        if self.estimator.is_some() || self.regulation.is_some() {
            let _ = self.stop();
        }
    }
}

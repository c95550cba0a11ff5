//! Melt-chamber temperature regulation and cap actuation.
//!
//! The heater is driven by a slow hysteresis loop: below the band the
//! heater relay is forced ON, above it forced OFF, inside it left
//! alone. The chiller (protecting the seals around the chamber) runs
//! unconditionally while the loop is active.

use crate::cancel::CancelToken;
use crate::error::ControlError;
use crate::power::{Output, PowerController};
use crate::servo::CapServo;
use rig_io::{RelayState, SharedThermometer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltConfig {
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub period_ms: u64,
    pub cap_open_deg: f64,
    pub cap_close_deg: f64,
    pub max_io_failures: u32,
}

impl Default for MeltConfig {
    fn default() -> Self {
        Self {
            temp_min_c: 110.0,
            temp_max_c: 120.0,
            period_ms: 1000,
            cap_open_deg: 45.0,
            cap_close_deg: -45.0,
            max_io_failures: 5,
        }
    }
}

/// Hysteresis decision for one temperature sample. `None` inside the
/// dead band.
pub fn heater_action(temp_c: f64, config: &MeltConfig) -> Option<RelayState> {
    if temp_c < config.temp_min_c {
        Some(RelayState::On)
    } else if temp_c > config.temp_max_c {
        Some(RelayState::Off)
    } else {
        None
    }
}

pub struct MeltingSystem {
    power: Arc<PowerController>,
    thermometer: SharedThermometer,
    servo: CapServo,
    config: MeltConfig,
    cancel: Arc<CancelToken>,
    worker: Option<JoinHandle<()>>,
}

impl MeltingSystem {
    pub fn new(
        power: Arc<PowerController>,
        thermometer: SharedThermometer,
        servo: CapServo,
        config: MeltConfig,
    ) -> Result<Self, ControlError> {
        if config.temp_min_c > config.temp_max_c {
            return Err(ControlError::InvalidParameter {
                name: "temp_min_c",
                value: config.temp_min_c,
            });
        }
        Ok(Self {
            power,
            thermometer,
            servo,
            config,
            cancel: CancelToken::new(),
            worker: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Drive the cap to its open stop. Synchronous; independent of the
    /// regulation loop.
    pub fn open_cap(&mut self) -> Result<(), ControlError> {
        self.servo.power_on()?;
        self.servo.set_angle(self.config.cap_open_deg)
    }

    pub fn close_cap(&mut self) -> Result<(), ControlError> {
        self.servo.power_on()?;
        self.servo.set_angle(self.config.cap_close_deg)
    }

    /// Energize the chiller and heater and launch the regulation loop.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        self.power.turn_on(Output::Chiller)?;
        self.power.turn_on(Output::Heater)?;
        self.cancel.reset();

        let power = Arc::clone(&self.power);
        let thermometer = Arc::clone(&self.thermometer);
        let cancel = Arc::clone(&self.cancel);
        let config = self.config.clone();
        let period = Duration::from_millis(config.period_ms);
        let spawned = thread::Builder::new()
            .name("melt-regulation".into())
            .spawn(move || {
                let mut failures = 0u32;
                while !cancel.is_requested() {
                    thread::sleep(period);
                    if cancel.is_requested() {
                        break;
                    }
                    let temp_c = match thermometer.object_temp_c() {
                        Ok(t) => {
                            failures = 0;
                            t
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(error = %e, failures, "thermometer read failed");
                            if failures > config.max_io_failures {
                                error!("thermometer unresponsive, melt loop stopping");
                                break;
                            }
                            continue;
                        }
                    };
                    trace!(temp_c, "melt loop sample");
                    if let Some(state) = heater_action(temp_c, &config) {
                        if let Err(e) = power.set(Output::Heater, state) {
                            error!(error = %e, "heater switch failed, melt loop stopping");
                            break;
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("melt regulation started");
                Ok(())
            }
            Err(e) => {
                self.cancel.request();
                let _ = self.power.turn_off(Output::Heater);
                let _ = self.power.turn_off(Output::Chiller);
                Err(ControlError::StartFailure(e.to_string()))
            }
        }
    }

    /// Cancel and join the loop, then de-energize heater and chiller.
    pub fn stop(&mut self) -> Result<(), ControlError> {
        let worker = self.worker.take().ok_or(ControlError::NotRunning)?;
        self.cancel.request();
        let panicked = worker.join().is_err();
        self.power.turn_off(Output::Heater)?;
        self.power.turn_off(Output::Chiller)?;
        if panicked {
            return Err(ControlError::WorkerPanicked);
        }
        info!("melt regulation stopped");
        Ok(())
    }
}

impl Drop for MeltingSystem {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::RelayBank;
    use rig_io::{HardwareError, PwmOutput, SimPwm, SimRelay, SimThermometer, Thermometer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn power(heater_a: &SimRelay, heater_b: &SimRelay, chiller: &SimRelay) -> Arc<PowerController> {
        let bank = RelayBank {
            chiller: Arc::new(chiller.clone()),
            heater_a: Arc::new(heater_a.clone()),
            heater_b: Arc::new(heater_b.clone()),
            drill: Arc::new(SimRelay::new()),
            proximity: Arc::new(SimRelay::new()),
            motor_x: Arc::new(SimRelay::new()),
            motor_z: Arc::new(SimRelay::new()),
        };
        Arc::new(PowerController::new(bank).unwrap())
    }

    fn system(
        power: Arc<PowerController>,
        thermometer: &SimThermometer,
        pwm: &SimPwm,
    ) -> MeltingSystem {
        let servo = CapServo::new(Arc::new(pwm.clone())).unwrap();
        let config = MeltConfig {
            period_ms: 5,
            ..MeltConfig::default()
        };
        MeltingSystem::new(power, Arc::new(thermometer.clone()), servo, config).unwrap()
    }

    #[test]
    fn hysteresis_dead_band() {
        let cfg = MeltConfig::default();
        assert_eq!(heater_action(100.0, &cfg), Some(RelayState::On));
        assert_eq!(heater_action(125.0, &cfg), Some(RelayState::Off));
        assert_eq!(heater_action(115.0, &cfg), None);
    }

    #[test]
    fn loop_tracks_temperature_band() {
        let (heater_a, heater_b, chiller) = (SimRelay::new(), SimRelay::new(), SimRelay::new());
        let thermometer = SimThermometer::new(130.0);
        let pwm = SimPwm::new();
        let mut melt = system(power(&heater_a, &heater_b, &chiller), &thermometer, &pwm);

        melt.start().unwrap();
        assert!(matches!(melt.start(), Err(ControlError::AlreadyRunning)));
        assert!(chiller.is_on());
        assert!(heater_a.is_on());

        // Too hot: the loop switches the heater off.
        thread::sleep(Duration::from_millis(40));
        assert!(!heater_a.is_on());
        assert!(!heater_b.is_on());

        // Too cold: back on.
        thermometer.set_temp(90.0);
        thread::sleep(Duration::from_millis(40));
        assert!(heater_a.is_on());
        assert!(heater_b.is_on());

        melt.stop().unwrap();
        assert!(!heater_a.is_on());
        assert!(!chiller.is_on());
        assert!(matches!(melt.stop(), Err(ControlError::NotRunning)));
    }

    /// Thermometer that tracks how many threads are reading at once.
    /// Reports a dead-band temperature so the loop issues no relay
    /// writes.
    struct MeteredThermometer {
        active: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl Thermometer for MeteredThermometer {
        fn object_temp_c(&self) -> Result<f64, HardwareError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(115.0)
        }
    }

    #[test]
    fn regulation_generations_never_overlap() {
        let (heater_a, heater_b, chiller) = (SimRelay::new(), SimRelay::new(), SimRelay::new());
        let meter = Arc::new(MeteredThermometer {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let servo = CapServo::new(Arc::new(SimPwm::new())).unwrap();
        let config = MeltConfig {
            period_ms: 1,
            ..MeltConfig::default()
        };
        let mut melt = MeltingSystem::new(
            power(&heater_a, &heater_b, &chiller),
            meter.clone(),
            servo,
            config,
        )
        .unwrap();
        for _ in 0..5 {
            melt.start().unwrap();
            thread::sleep(Duration::from_millis(10));
            melt.stop().unwrap();
        }
        assert_eq!(meter.max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cap_moves_between_fixed_angles() {
        let (heater_a, heater_b, chiller) = (SimRelay::new(), SimRelay::new(), SimRelay::new());
        let thermometer = SimThermometer::new(20.0);
        let pwm = SimPwm::new();
        let mut melt = system(power(&heater_a, &heater_b, &chiller), &thermometer, &pwm);

        melt.open_cap().unwrap();
        assert!(pwm.is_running());
        assert!((pwm.duty_percent() - 20.0).abs() < 1e-9);
        melt.close_cap().unwrap();
        assert!((pwm.duty_percent() - 10.0).abs() < 1e-9);
    }
}

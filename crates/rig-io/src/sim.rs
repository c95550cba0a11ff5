//! Simulated peripherals. Each device is a cheap handle over shared
//! atomics so a test (or the physics rig) can observe and script the
//! hardware side while the control code drives the trait side.

use crate::error::HardwareError;
use crate::io::{
    AnalogInput, DigitalInput, DigitalOutput, EdgeInput, EdgeWait, Level, PwmOutput, RegisterBus,
    Relay, RelayState,
};
use crate::sensors::{LoadCell, ProximitySensor, Thermometer};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn f64_bits_load(bits: &AtomicU64) -> f64 {
    f64::from_bits(bits.load(Ordering::Relaxed))
}

fn f64_bits_store(bits: &AtomicU64, value: f64) {
    bits.store(value.to_bits(), Ordering::Relaxed);
}

/// Simulated digital line, usable as both input and output. Rising
/// edges on the output side are counted so tests can verify step
/// pulses.
#[derive(Clone)]
pub struct SimLine {
    high: Arc<AtomicBool>,
    rising_edges: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl SimLine {
    pub fn new(initial: Level) -> Self {
        Self {
            high: Arc::new(AtomicBool::new(initial == Level::High)),
            rising_edges: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set(&self, level: Level) {
        self.high.store(level == Level::High, Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        if self.high.load(Ordering::Relaxed) {
            Level::High
        } else {
            Level::Low
        }
    }

    /// Rising edges seen on the output side since construction.
    pub fn rising_edges(&self) -> u64 {
        self.rising_edges.load(Ordering::Relaxed)
    }

    /// Total writes, regardless of level change.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl DigitalInput for SimLine {
    fn read(&self) -> Result<Level, HardwareError> {
        Ok(self.level())
    }
}

impl DigitalOutput for SimLine {
    fn write(&self, level: Level) -> Result<(), HardwareError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let was_high = self.high.swap(level == Level::High, Ordering::Relaxed);
        if !was_high && level == Level::High {
            self.rising_edges.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Simulated edge-detecting input fed through a channel, preserving
/// single-producer/single-consumer pulse ordering.
pub struct SimEdge {
    rx: Mutex<Receiver<()>>,
    tx: Sender<()>,
}

impl SimEdge {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx: Mutex::new(rx),
            tx,
        }
    }

    /// Handle for the hardware side to inject pulses.
    pub fn pulser(&self) -> SimEdgePulser {
        SimEdgePulser {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SimEdgePulser {
    tx: Sender<()>,
}

impl SimEdgePulser {
    pub fn pulse(&self) {
        let _ = self.tx.send(());
    }
}

impl EdgeInput for SimEdge {
    fn wait_rising(&self, timeout: Duration) -> Result<EdgeWait, HardwareError> {
        let rx = self.rx.lock().unwrap();
        match rx.recv_timeout(timeout) {
            Ok(()) => Ok(EdgeWait::Edge),
            Err(RecvTimeoutError::Timeout) => Ok(EdgeWait::TimedOut),
            Err(RecvTimeoutError::Disconnected) => {
                Err(HardwareError::read("sim-edge", "pulse source disconnected"))
            }
        }
    }
}

/// Simulated ADC channel with a settable ratio.
#[derive(Clone)]
pub struct SimAnalog {
    ratio: Arc<AtomicU64>,
}

impl SimAnalog {
    pub fn new(ratio: f64) -> Self {
        let cell = Arc::new(AtomicU64::new(0));
        f64_bits_store(&cell, ratio);
        Self { ratio: cell }
    }

    pub fn set_ratio(&self, ratio: f64) {
        f64_bits_store(&self.ratio, ratio.clamp(0.0, 1.0));
    }
}

impl AnalogInput for SimAnalog {
    fn read_ratio(&self, _samples: u32) -> Result<f64, HardwareError> {
        Ok(f64_bits_load(&self.ratio))
    }
}

/// Simulated PWM channel.
#[derive(Clone)]
pub struct SimPwm {
    frequency_hz: Arc<AtomicU64>,
    duty_percent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl SimPwm {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            frequency_hz: Arc::new(AtomicU64::new(0)),
            duty_percent: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn frequency_hz(&self) -> f64 {
        f64_bits_load(&self.frequency_hz)
    }

    pub fn duty_percent(&self) -> f64 {
        f64_bits_load(&self.duty_percent)
    }
}

impl PwmOutput for SimPwm {
    fn set_frequency(&self, hz: f64) -> Result<(), HardwareError> {
        f64_bits_store(&self.frequency_hz, hz);
        Ok(())
    }

    fn set_duty_percent(&self, percent: f64) -> Result<(), HardwareError> {
        f64_bits_store(&self.duty_percent, percent);
        Ok(())
    }

    fn start(&self) -> Result<(), HardwareError> {
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<(), HardwareError> {
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Simulated register bus with one settable register value.
#[derive(Clone)]
pub struct SimBus {
    value: Arc<AtomicU16>,
}

impl SimBus {
    pub fn new(value: u16) -> Self {
        Self {
            value: Arc::new(AtomicU16::new(value)),
        }
    }

    pub fn set_value(&self, value: u16) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl RegisterBus for SimBus {
    fn read_register(&self, _addr: u8) -> Result<u16, HardwareError> {
        Ok(self.value.load(Ordering::Relaxed))
    }
}

/// Simulated relay with optional write-failure injection.
#[derive(Clone)]
pub struct SimRelay {
    on: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl SimRelay {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            on: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent `set_state` calls fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

impl Relay for SimRelay {
    fn set_state(&self, state: RelayState) -> Result<(), HardwareError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(HardwareError::write("sim-relay", "injected failure"));
        }
        self.on.store(state == RelayState::On, Ordering::Relaxed);
        Ok(())
    }

    fn state(&self) -> Result<RelayState, HardwareError> {
        if self.on.load(Ordering::Relaxed) {
            Ok(RelayState::On)
        } else {
            Ok(RelayState::Off)
        }
    }
}

/// Simulated proximity sensor.
#[derive(Clone)]
pub struct SimProximity {
    triggered: Arc<AtomicBool>,
}

impl SimProximity {
    pub fn new(triggered: bool) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(triggered)),
        }
    }

    pub fn set_triggered(&self, triggered: bool) {
        self.triggered.store(triggered, Ordering::Relaxed);
    }
}

impl ProximitySensor for SimProximity {
    fn is_triggered(&self) -> Result<bool, HardwareError> {
        Ok(self.triggered.load(Ordering::Relaxed))
    }
}

/// Simulated load cell.
#[derive(Clone)]
pub struct SimLoadCell {
    kg: Arc<AtomicU64>,
}

impl SimLoadCell {
    pub fn new(kg: f64) -> Self {
        let cell = Arc::new(AtomicU64::new(0));
        f64_bits_store(&cell, kg);
        Self { kg: cell }
    }

    pub fn set_weight(&self, kg: f64) {
        f64_bits_store(&self.kg, kg);
    }
}

impl LoadCell for SimLoadCell {
    fn weight_kg(&self) -> Result<f64, HardwareError> {
        Ok(f64_bits_load(&self.kg))
    }
}

/// Simulated thermometer.
#[derive(Clone)]
pub struct SimThermometer {
    temp_c: Arc<AtomicU64>,
}

impl SimThermometer {
    pub fn new(temp_c: f64) -> Self {
        let cell = Arc::new(AtomicU64::new(0));
        f64_bits_store(&cell, temp_c);
        Self { temp_c: cell }
    }

    pub fn set_temp(&self, temp_c: f64) {
        f64_bits_store(&self.temp_c, temp_c);
    }
}

impl Thermometer for SimThermometer {
    fn object_temp_c(&self) -> Result<f64, HardwareError> {
        Ok(f64_bits_load(&self.temp_c))
    }
}

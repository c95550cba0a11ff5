//! Background telemetry sampling. Publishes the latest readings for
//! in-process consumers and emits structured records under the
//! `telemetry` target for whatever sink the host process wires up.

use crate::cancel::CancelToken;
use crate::error::ControlError;
use rig_io::{SharedCurrentSensor, SharedLoadCell, SharedThermometer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetrySnapshot {
    pub current_amps: Option<f64>,
    pub weight_kg: Option<f64>,
    pub temp_c: Option<f64>,
}

#[derive(Default)]
struct Cells {
    current_amps: AtomicU64,
    weight_kg: AtomicU64,
    temp_c: AtomicU64,
}

fn store(cell: &AtomicU64, value: Option<f64>) {
    cell.store(value.unwrap_or(f64::NAN).to_bits(), Ordering::Relaxed);
}

fn load(cell: &AtomicU64) -> Option<f64> {
    let value = f64::from_bits(cell.load(Ordering::Relaxed));
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

pub struct TelemetrySampler {
    current: SharedCurrentSensor,
    load_cell: SharedLoadCell,
    thermometer: SharedThermometer,
    period: Duration,
    cells: Arc<Cells>,
    cancel: Arc<CancelToken>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetrySampler {
    pub fn new(
        current: SharedCurrentSensor,
        load_cell: SharedLoadCell,
        thermometer: SharedThermometer,
        period_ms: u64,
    ) -> Self {
        let cells = Arc::new(Cells::default());
        store(&cells.current_amps, None);
        store(&cells.weight_kg, None);
        store(&cells.temp_c, None);
        Self {
            current,
            load_cell,
            thermometer,
            period: Duration::from_millis(period_ms),
            cells,
            cancel: CancelToken::new(),
            worker: None,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            current_amps: load(&self.cells.current_amps),
            weight_kg: load(&self.cells.weight_kg),
            temp_c: load(&self.cells.temp_c),
        }
    }

    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        self.cancel.reset();
        let current = Arc::clone(&self.current);
        let load_cell = Arc::clone(&self.load_cell);
        let thermometer = Arc::clone(&self.thermometer);
        let cells = Arc::clone(&self.cells);
        let cancel = Arc::clone(&self.cancel);
        let period = self.period;
        let spawned = thread::Builder::new()
            .name("telemetry-sampler".into())
            .spawn(move || {
                while !cancel.is_requested() {
                    let amps = current.current_amps().ok();
                    let kg = load_cell.weight_kg().ok();
                    let temp = thermometer.object_temp_c().ok();
                    store(&cells.current_amps, amps);
                    store(&cells.weight_kg, kg);
                    store(&cells.temp_c, temp);
                    info!(
                        target: "telemetry",
                        current_amps = amps,
                        weight_kg = kg,
                        temp_c = temp,
                        "sample"
                    );
                    thread::sleep(period);
                }
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.cancel.request();
                Err(ControlError::StartFailure(e.to_string()))
            }
        }
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        let worker = self.worker.take().ok_or(ControlError::NotRunning)?;
        self.cancel.request();
        worker.join().map_err(|_| ControlError::WorkerPanicked)
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_io::{RatioCurrentSensor, SimAnalog, SimLoadCell, SimThermometer};

    #[test]
    fn publishes_latest_readings() {
        let current: SharedCurrentSensor =
            Arc::new(RatioCurrentSensor::new(Arc::new(SimAnalog::new(0.5)), 0.0, 10.0, 1));
        let load_cell = SimLoadCell::new(2.5);
        let thermometer = SimThermometer::new(-20.0);
        let mut sampler = TelemetrySampler::new(
            current,
            Arc::new(load_cell.clone()),
            Arc::new(thermometer.clone()),
            2,
        );
        assert!(sampler.snapshot().weight_kg.is_none());

        sampler.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        let snap = sampler.snapshot();
        assert_eq!(snap.weight_kg, Some(2.5));
        assert_eq!(snap.current_amps, Some(5.0));
        assert_eq!(snap.temp_c, Some(-20.0));
        sampler.stop().unwrap();
    }
}

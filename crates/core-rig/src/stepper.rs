//! Stepper motor primitive: pulse/direction lines, a blocking step
//! generator, and a cancellable background stepping task.

use crate::cancel::CancelToken;
use crate::error::ControlError;
use rig_io::{Level, SharedOutput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::error;

/// Rotation direction. Forward drives the direction line high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Compute the inter-step delay in microseconds for a target speed.
/// Strictly positive for any valid input.
pub fn step_delay_micros(rpm: f64, steps_per_revolution: u32) -> u64 {
    let delay = 60_000_000.0 / (rpm * f64::from(steps_per_revolution));
    (delay.round() as u64).max(1)
}

pub type StepCallback = Box<dyn FnOnce(u64) + Send>;

pub struct StepperMotor {
    pulse: SharedOutput,
    dir: SharedOutput,
    sleep_line: Option<SharedOutput>,
    direction: Option<Direction>,
    rpm: f64,
    steps_per_revolution: u32,
    step_delay_us: Arc<AtomicU64>,
    sleeping: bool,
    cancel: Arc<CancelToken>,
    worker: Option<JoinHandle<u64>>,
}

impl StepperMotor {
    pub fn new(
        pulse: SharedOutput,
        dir: SharedOutput,
        sleep_line: Option<SharedOutput>,
        rpm: f64,
        steps_per_revolution: u32,
    ) -> Result<Self, ControlError> {
        let mut motor = Self {
            pulse,
            dir,
            sleep_line,
            direction: None,
            rpm: 0.0,
            steps_per_revolution,
            step_delay_us: Arc::new(AtomicU64::new(0)),
            sleeping: false,
            cancel: CancelToken::new(),
            worker: None,
        };
        motor.set_rpm(rpm)?;
        motor.set_direction(Direction::Forward)?;
        Ok(motor)
    }

    pub fn rpm(&self) -> f64 {
        self.rpm
    }

    pub fn steps_per_revolution(&self) -> u32 {
        self.steps_per_revolution
    }

    pub fn direction(&self) -> Direction {
        self.direction.unwrap_or(Direction::Forward)
    }

    /// Set the target speed, recomputing the inter-step delay. The
    /// background task (if running) picks up the new delay on its
    /// next step.
    pub fn set_rpm(&mut self, rpm: f64) -> Result<(), ControlError> {
        if !rpm.is_finite() || rpm <= 0.0 {
            return Err(ControlError::InvalidSpeed {
                value: rpm,
                reason: "stepper speed must be a positive, finite RPM",
            });
        }
        self.rpm = rpm;
        self.step_delay_us.store(
            step_delay_micros(rpm, self.steps_per_revolution),
            Ordering::Relaxed,
        );
        Ok(())
    }

    /// Apply a direction, touching the line only on an actual change.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), ControlError> {
        if self.direction == Some(direction) {
            return Ok(());
        }
        let level = match direction {
            Direction::Forward => Level::High,
            Direction::Reverse => Level::Low,
        };
        self.dir.write(level)?;
        self.direction = Some(direction);
        Ok(())
    }

    /// Put the windings to sleep (all-windings-off) or wake them.
    pub fn set_sleeping(&mut self, sleeping: bool) -> Result<(), ControlError> {
        if self.sleeping == sleeping {
            return Ok(());
        }
        if let Some(line) = &self.sleep_line {
            line.write(if sleeping { Level::High } else { Level::Low })?;
        }
        self.sleeping = sleeping;
        Ok(())
    }

    /// Issue `count` step pulses, sleeping the inter-step delay after
    /// each. Blocks the calling thread for the whole motion.
    pub fn step(&self, count: u64) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        let delay = Duration::from_micros(self.step_delay_us.load(Ordering::Relaxed));
        for _ in 0..count {
            self.pulse.write(Level::High)?;
            self.pulse.write(Level::Low)?;
            thread::sleep(delay);
        }
        Ok(())
    }

    /// Rotate by a signed angle; negative angles reverse direction.
    /// Returns the number of steps issued.
    pub fn rotate(&mut self, angle_deg: f64) -> Result<u64, ControlError> {
        if !angle_deg.is_finite() {
            return Err(ControlError::InvalidParameter {
                name: "angle_deg",
                value: angle_deg,
            });
        }
        self.set_direction(if angle_deg < 0.0 {
            Direction::Reverse
        } else {
            Direction::Forward
        })?;
        let step_angle = 360.0 / f64::from(self.steps_per_revolution);
        let steps = (angle_deg.abs() / step_angle).round() as u64;
        self.step(steps)?;
        Ok(steps)
    }

    /// Launch a background task that steps until cancelled, then
    /// invokes `callback` with the total step count.
    pub fn start_continuous(&mut self, callback: Option<StepCallback>) -> Result<(), ControlError> {
        if self.worker.is_some() {
            return Err(ControlError::AlreadyRunning);
        }
        self.cancel.reset();

        let pulse = Arc::clone(&self.pulse);
        let delay_us = Arc::clone(&self.step_delay_us);
        let cancel = Arc::clone(&self.cancel);
        let spawned = thread::Builder::new()
            .name("stepper-continuous".into())
            .spawn(move || {
                let mut steps: u64 = 0;
                while !cancel.is_requested() {
                    if let Err(e) = pulse.write(Level::High).and_then(|_| pulse.write(Level::Low)) {
                        error!(error = %e, "step pulse failed; stopping continuous task");
                        break;
                    }
                    steps += 1;
                    thread::sleep(Duration::from_micros(delay_us.load(Ordering::Relaxed)));
                }
                if let Some(callback) = callback {
                    callback(steps);
                }
                steps
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

    /// Cancel the background task and join it. Returns the total step
    /// count once the thread has fully exited.
    pub fn stop_continuous(&mut self) -> Result<u64, ControlError> {
        let worker = self.worker.take().ok_or(ControlError::NotRunning)?;
        self.cancel.request();
        worker.join().map_err(|_| ControlError::WorkerPanicked)
    }

    pub fn is_running_continuous(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for StepperMotor {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop_continuous();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_io::{DigitalOutput, HardwareError, SimLine};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn motor(pulse: &SimLine, dir: &SimLine) -> StepperMotor {
        StepperMotor::new(
            Arc::new(pulse.clone()),
            Arc::new(dir.clone()),
            None,
            6000.0,
            200,
        )
        .unwrap()
    }

    #[test]
    fn delay_formula() {
        assert_eq!(step_delay_micros(60.0, 1000), 1000);
        assert_eq!(step_delay_micros(100.0, 1000), 600);
        assert_eq!(step_delay_micros(1.0, 200), 300_000);
    }

    #[test]
    fn rejects_nonpositive_speed() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        assert!(matches!(
            m.set_rpm(0.0),
            Err(ControlError::InvalidSpeed { .. })
        ));
        assert!(matches!(
            m.set_rpm(f64::NAN),
            Err(ControlError::InvalidSpeed { .. })
        ));
    }

    #[test]
    fn full_revolution_issues_steps_per_revolution_pulses() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        let steps = m.rotate(360.0).unwrap();
        assert_eq!(steps, 200);
        assert_eq!(pulse.rising_edges(), 200);
    }

    #[test]
    fn negative_rotation_same_count_opposite_direction() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        m.rotate(360.0).unwrap();
        assert_eq!(dir.level(), Level::High);
        let before = pulse.rising_edges();
        let steps = m.rotate(-360.0).unwrap();
        assert_eq!(steps, 200);
        assert_eq!(pulse.rising_edges() - before, 200);
        assert_eq!(dir.level(), Level::Low);
    }

    #[test]
    fn sleep_line_written_only_on_change() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let sleep = SimLine::new(Level::Low);
        let mut m = StepperMotor::new(
            Arc::new(pulse),
            Arc::new(dir),
            Some(Arc::new(sleep.clone())),
            6000.0,
            200,
        )
        .unwrap();
        m.set_sleeping(true).unwrap();
        assert_eq!(sleep.level(), Level::High);
        let writes = sleep.writes();
        m.set_sleeping(true).unwrap();
        assert_eq!(sleep.writes(), writes);
        m.set_sleeping(false).unwrap();
        assert_eq!(sleep.level(), Level::Low);
    }

    #[test]
    fn direction_writes_only_on_change() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        let writes = dir.writes();
        m.set_direction(Direction::Forward).unwrap();
        m.set_direction(Direction::Forward).unwrap();
        assert_eq!(dir.writes(), writes);
        m.set_direction(Direction::Reverse).unwrap();
        assert_eq!(dir.writes(), writes + 1);
    }

    #[test]
    fn continuous_stop_joins_and_reports_count() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        let (tx, rx) = mpsc::channel();
        m.start_continuous(Some(Box::new(move |steps| {
            tx.send(steps).unwrap();
        })))
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        let steps = m.stop_continuous().unwrap();
        assert!(steps > 0);
        assert_eq!(rx.recv().unwrap(), steps);

        // Thread has exited: pulse count must not advance anymore.
        let settled = pulse.rising_edges();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pulse.rising_edges(), settled);
    }

    #[test]
    fn double_start_and_stop_without_start_are_errors() {
        let pulse = SimLine::new(Level::Low);
        let dir = SimLine::new(Level::Low);
        let mut m = motor(&pulse, &dir);
        assert!(matches!(
            m.stop_continuous(),
            Err(ControlError::NotRunning)
        ));
        m.start_continuous(None).unwrap();
        assert!(matches!(
            m.start_continuous(None),
            Err(ControlError::AlreadyRunning)
        ));
        m.stop_continuous().unwrap();
    }

    /// Output that tracks how many threads are inside `write` at once.
    struct ConcurrencyMeter {
        active: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl DigitalOutput for ConcurrencyMeter {
        fn write(&self, _level: Level) -> Result<(), HardwareError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn generations_never_overlap() {
        let meter = Arc::new(ConcurrencyMeter {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let dir = SimLine::new(Level::Low);
        let mut m = StepperMotor::new(
            meter.clone(),
            Arc::new(dir),
            None,
            30000.0,
            200,
        )
        .unwrap();
        for _ in 0..5 {
            m.start_continuous(None).unwrap();
            thread::sleep(Duration::from_millis(5));
            m.stop_continuous().unwrap();
        }
        assert_eq!(meter.max_seen.load(Ordering::SeqCst), 1);
    }
}

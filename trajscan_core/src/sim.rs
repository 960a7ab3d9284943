//! Channel-free trajectory controller.
//!
//! Drives virtual motors on worker threads paced by an injected [`Clock`].
//! With a manual clock a trajectory of any length completes at once, which
//! keeps scans deterministic in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use trajscan_traits::{AXIS_SLOTS, Clock};

use crate::config::{ControllerLimits, SimulationCfg, Timeouts};
use crate::controller::{
    PhaseTracker, TrajectoryController, check_element_count, check_pulse_count,
    check_pulse_window, check_time, slot,
};
use crate::error::Result;
use crate::observer::StatusSubscription;
use crate::path::sample_at_pulses;
use crate::status::{Phase, PhaseSnapshot, PhaseStatus};
use crate::util::CancelToken;

/// Number of sleeps a simulated move is split into; abort is checked
/// between them.
const MOTION_STEPS: u32 = 100;

#[derive(Debug, Default, Clone)]
struct Program {
    element_count: usize,
    pulse_count: usize,
    pulse_start: usize,
    pulse_stop: usize,
    time_s: f64,
    built: bool,
}

#[derive(Debug, Clone)]
struct Executed {
    pulses: usize,
    actual: Vec<(usize, Vec<f64>)>,
}

struct Shared {
    tracker: PhaseTracker,
    program: Mutex<Program>,
    executed: Mutex<Option<Executed>>,
    abort: AtomicBool,
    clock: Arc<dyn Clock>,
    sim: SimulationCfg,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SimulatedTrajectoryController {
    shared: Arc<Shared>,
    limits: ControllerLimits,
    timeouts: Timeouts,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedTrajectoryController {
    pub fn new(
        limits: ControllerLimits,
        timeouts: Timeouts,
        sim: SimulationCfg,
        clock: Arc<dyn Clock>,
        axis_names: &[String],
    ) -> Self {
        let tracker = PhaseTracker::new();
        for k in 0..AXIS_SLOTS {
            let name = axis_names
                .get(k)
                .cloned()
                .unwrap_or_else(|| format!("M{}", k + 1));
            tracker.with_axis(k, |s| s.name = name);
        }
        Self {
            shared: Arc::new(Shared {
                tracker,
                program: Mutex::new(Program::default()),
                executed: Mutex::new(None),
                abort: AtomicBool::new(false),
                clock,
                sim,
            }),
            limits,
            timeouts,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn spawn(&self, phase: Phase, job: impl FnOnce(&Shared) + Send + 'static) -> Result<()> {
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sim-{phase}"))
            .spawn(move || job(&shared))?;
        let mut workers = lock(&self.workers);
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
        Ok(())
    }

    fn invalidate(&self) {
        lock(&self.shared.program).built = false;
    }
}

impl Shared {
    fn validate(&self) -> std::result::Result<(), String> {
        let p = lock(&self.program).clone();
        if p.element_count == 0 {
            return Err("element count not set".into());
        }
        if p.pulse_count == 0 {
            return Err("pulse count not set".into());
        }
        if p.pulse_stop > p.element_count || p.pulse_start == 0 {
            return Err(format!(
                "pulse window {}..{} outside {} elements",
                p.pulse_start, p.pulse_stop, p.element_count
            ));
        }
        if p.time_s <= 0.0 {
            return Err("time not set".into());
        }
        let axes = self.tracker.axes();
        let enabled: Vec<(usize, usize)> = axes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.enabled)
            .map(|(i, a)| (i + 1, a.trajectory.len()))
            .collect();
        if enabled.is_empty() {
            return Err("no axis enabled".into());
        }
        if let Some((k, len)) = enabled.iter().find(|(_, len)| *len < p.element_count) {
            return Err(format!(
                "axis {k} trajectory has {len} points, need {}",
                p.element_count
            ));
        }
        Ok(())
    }

    fn run_build(&self) {
        self.clock
            .sleep(Duration::from_millis(self.sim.build_latency_ms));
        let (status, message) = match self.validate() {
            Ok(()) => (PhaseStatus::Success, "Build complete".to_string()),
            Err(m) => (PhaseStatus::Failure, m),
        };
        lock(&self.program).built = status.is_success();
        self.tracker.complete(Phase::Build, status, Some(message));
    }

    fn run_execute(&self) {
        let p = lock(&self.program).clone();
        if !p.built {
            self.tracker.complete(
                Phase::Execute,
                PhaseStatus::Failure,
                Some("Trajectory not built".into()),
            );
            return;
        }
        let speed = if self.sim.speed_factor > 0.0 {
            self.sim.speed_factor
        } else {
            1.0
        };
        let step = Duration::from_secs_f64(p.time_s / speed) / MOTION_STEPS;
        let mut done = 0;
        while done < MOTION_STEPS && !self.abort.load(Ordering::SeqCst) {
            self.clock.sleep(step);
            done += 1;
        }
        let aborted = done < MOTION_STEPS;
        let pulses = if aborted {
            p.pulse_count * done as usize / MOTION_STEPS as usize
        } else {
            p.pulse_count
        };
        let actual = self
            .tracker
            .axes()
            .into_iter()
            .enumerate()
            .filter(|(_, a)| a.enabled)
            .map(|(offset, a)| {
                let traj = &a.trajectory[..p.element_count.min(a.trajectory.len())];
                let mut pos = sample_at_pulses(traj, p.pulse_start, p.pulse_stop, p.pulse_count);
                pos.truncate(pulses);
                (offset, pos)
            })
            .collect();
        *lock(&self.executed) = Some(Executed { pulses, actual });
        let (status, message) = if aborted {
            (PhaseStatus::Abort, "Trajectory aborted")
        } else {
            (PhaseStatus::Success, "Trajectory complete")
        };
        self.tracker
            .complete(Phase::Execute, status, Some(message.into()));
    }

    fn run_read(&self) {
        self.clock
            .sleep(Duration::from_millis(self.sim.read_latency_ms));
        let executed = lock(&self.executed).clone();
        match executed {
            Some(ex) => {
                self.tracker.store_actuals(ex.pulses, ex.actual);
                self.tracker.complete(
                    Phase::Read,
                    PhaseStatus::Success,
                    Some("Read complete".into()),
                );
            }
            None => self.tracker.complete(
                Phase::Read,
                PhaseStatus::Failure,
                Some("No trajectory executed".into()),
            ),
        }
    }
}

impl TrajectoryController for SimulatedTrajectoryController {
    fn limits(&self) -> &ControllerLimits {
        &self.limits
    }

    fn configure_axis(&self, index: usize, enabled: bool, trajectory: &[f64]) -> Result<()> {
        let offset = slot(index)?;
        self.shared.tracker.with_axis(offset, |s| {
            s.enabled = enabled;
            s.trajectory = trajectory.to_vec();
        });
        self.invalidate();
        Ok(())
    }

    fn set_axis_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        let offset = slot(index)?;
        self.shared.tracker.with_axis(offset, |s| s.enabled = enabled);
        self.invalidate();
        Ok(())
    }

    fn axis_name(&self, index: usize) -> Result<String> {
        let offset = slot(index)?;
        Ok(self.shared.tracker.with_axis(offset, |s| s.name.clone()))
    }

    fn set_element_count(&self, n: usize) -> Result<()> {
        check_element_count(&self.limits, n)?;
        lock(&self.shared.program).element_count = n;
        self.invalidate();
        Ok(())
    }

    fn set_pulse_count(&self, n: usize) -> Result<()> {
        check_pulse_count(&self.limits, n)?;
        lock(&self.shared.program).pulse_count = n;
        self.invalidate();
        Ok(())
    }

    fn set_pulse_window(&self, start: usize, stop: usize) -> Result<()> {
        check_pulse_window(&self.limits, start, stop)?;
        {
            let mut p = lock(&self.shared.program);
            p.pulse_start = start;
            p.pulse_stop = stop;
        }
        self.invalidate();
        Ok(())
    }

    fn set_time(&self, seconds: f64) -> Result<()> {
        check_time(seconds)?;
        lock(&self.shared.program).time_s = seconds;
        self.invalidate();
        Ok(())
    }

    fn build(&self) -> Result<()> {
        self.shared.tracker.begin(Phase::Build)?;
        tracing::info!(phase = %Phase::Build, "phase invoked");
        self.spawn(Phase::Build, |s| s.run_build())
    }

    fn execute(&self) -> Result<()> {
        self.shared.tracker.begin(Phase::Execute)?;
        self.shared.abort.store(false, Ordering::SeqCst);
        tracing::info!(phase = %Phase::Execute, "phase invoked");
        self.spawn(Phase::Execute, |s| s.run_execute())
    }

    fn read(&self) -> Result<()> {
        self.shared.tracker.begin(Phase::Read)?;
        tracing::info!(phase = %Phase::Read, "phase invoked");
        self.spawn(Phase::Read, |s| s.run_read())
    }

    fn stop(&self) -> Result<()> {
        tracing::info!("trajectory abort requested");
        self.shared.abort.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn phase(&self, phase: Phase) -> PhaseSnapshot {
        self.shared.tracker.snapshot(phase)
    }

    fn wait_for(
        &self,
        phase: Phase,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<PhaseSnapshot> {
        Ok(self
            .shared
            .tracker
            .wait_for(phase, timeout, self.timeouts.poll(), cancel)?)
    }

    fn subscribe_execute(&self) -> StatusSubscription<PhaseStatus> {
        self.shared.tracker.subscribe_execute()
    }

    fn actual_positions(&self, index: usize) -> Result<Vec<f64>> {
        let offset = slot(index)?;
        Ok(self
            .shared
            .tracker
            .with_axis(offset, |s| s.actual_positions.clone()))
    }

    fn actual_pulse_count(&self) -> usize {
        self.shared.tracker.actual_pulses()
    }
}

impl Drop for SimulatedTrajectoryController {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::SeqCst);
        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for w in workers {
            if w.join().is_err() {
                tracing::warn!("simulated controller worker panicked");
            }
        }
        tracing::trace!("simulated controller shut down");
    }
}

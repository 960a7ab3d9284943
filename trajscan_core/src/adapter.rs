//! Step-scan lifecycle mapped onto trajectory phases.
//!
//! A scan line is `prepare_for_continuous_move` (synthesize, configure,
//! build), `perform_continuous_move` (execute, returns at once) and
//! `continuous_move_complete` (wait for the move, then optionally read the
//! achieved positions back).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;
use trajscan_traits::AXIS_SLOTS;

use crate::config::{AdapterCfg, MotionCfg, Timeouts};
use crate::controller::TrajectoryController;
use crate::error::{Result, TrajError};
use crate::observer::StatusSubscription;
use crate::path::define_constant_velocity_path;
use crate::status::{Phase, PhaseSnapshot, PhaseStatus};
use crate::util::{CancelToken, duration_ms, wait_slice};

/// Parameters of one constant-velocity scan line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousParameters {
    pub start: f64,
    pub end: f64,
    /// Seconds spent at constant velocity.
    pub total_time: f64,
    /// Detector frames, one pulse each.
    pub points: usize,
}

impl ContinuousParameters {
    fn validate(&self) -> std::result::Result<(), TrajError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(TrajError::Config(format!(
                "scan range {}..{} is not finite",
                self.start, self.end
            )));
        }
        if !(self.total_time.is_finite() && self.total_time > 0.0) {
            return Err(TrajError::out_of_range(
                "total time",
                self.total_time,
                "finite and > 0",
            ));
        }
        if self.points == 0 {
            return Err(TrajError::out_of_range("points", 0, ">= 1"));
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ContinuousAxisAdapter<C: ?Sized> {
    controller: Arc<C>,
    axis: usize,
    motion: MotionCfg,
    timeouts: Timeouts,
    cfg: AdapterCfg,
    cancel: CancelToken,
    params: Mutex<Option<ContinuousParameters>>,
    /// Axis and parameters of the last successful build.
    built_for: Mutex<Option<(usize, ContinuousParameters)>>,
    pending: Mutex<Option<StatusSubscription<PhaseStatus>>>,
}

impl<C: TrajectoryController + ?Sized> ContinuousAxisAdapter<C> {
    pub fn new(
        controller: Arc<C>,
        axis: usize,
        motion: MotionCfg,
        timeouts: Timeouts,
        cfg: AdapterCfg,
        cancel: CancelToken,
    ) -> Result<Self> {
        if !(1..=AXIS_SLOTS).contains(&axis) {
            return Err(TrajError::AxisRange {
                index: axis,
                max: AXIS_SLOTS,
            }
            .into());
        }
        Ok(Self {
            controller,
            axis,
            motion,
            timeouts,
            cfg,
            cancel,
            params: Mutex::new(None),
            built_for: Mutex::new(None),
            pending: Mutex::new(None),
        })
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn read_back(&self) -> bool {
        self.cfg.read_back
    }

    pub fn set_continuous_parameters(&self, params: ContinuousParameters) {
        *lock(&self.params) = Some(params);
    }

    pub fn continuous_parameters(&self) -> Option<ContinuousParameters> {
        *lock(&self.params)
    }

    fn require_params(&self) -> std::result::Result<ContinuousParameters, TrajError> {
        self.continuous_parameters()
            .ok_or_else(|| TrajError::Config("continuous parameters not set".into()))
    }

    /// Forget the last build so the next prepare rebuilds.
    pub fn invalidate_build(&self) {
        if lock(&self.built_for).take().is_some() {
            tracing::debug!(axis = self.axis, "build cache invalidated");
        }
    }

    /// Whether the next prepare would skip the build.
    pub fn build_is_cached(&self) -> bool {
        self.cfg.two_d_mode
            && self
                .continuous_parameters()
                .is_some_and(|p| *lock(&self.built_for) == Some((self.axis, p)))
    }

    fn wait_phase(&self, phase: Phase) -> Result<PhaseSnapshot> {
        self.controller
            .wait_for(phase, self.timeouts.for_phase(phase), &self.cancel)
    }

    pub fn prepare_for_continuous_move(&self) -> Result<()> {
        let params = self.require_params()?;
        params.validate()?;
        if self.build_is_cached() {
            tracing::debug!(axis = self.axis, "trajectory unchanged; build skipped");
            return Ok(());
        }
        self.invalidate_build();

        let traj = define_constant_velocity_path(
            params.start,
            params.end,
            params.total_time,
            self.motion.element_count,
            self.motion.acceleration_time_s,
        )?;
        let c = &self.controller;
        for k in (1..=AXIS_SLOTS).filter(|k| *k != self.axis) {
            c.set_axis_enabled(k, false)?;
        }
        c.configure_axis(self.axis, true, &traj.path)?;
        c.set_element_count(traj.total_element_count())?;
        c.set_pulse_count(params.points)?;
        c.set_pulse_window(traj.pulse_start_element, traj.pulse_stop_element)?;
        c.set_time(traj.total_time)?;
        tracing::info!(
            axis = self.axis,
            start = params.start,
            end = params.end,
            points = params.points,
            elements = traj.total_element_count(),
            time_s = traj.total_time,
            "building trajectory"
        );

        c.build()?;
        let snap = self.wait_phase(Phase::Build)?;
        if !snap.status.is_success() {
            return Err(TrajError::PhaseFailed {
                phase: Phase::Build,
                status: snap.status,
                message: snap.message,
            }
            .into());
        }
        *lock(&self.built_for) = Some((self.axis, params));
        Ok(())
    }

    /// Start the move. Returns once Execute is triggered.
    pub fn perform_continuous_move(&self) -> Result<()> {
        let sub = self.controller.subscribe_execute();
        *lock(&self.pending) = Some(sub);
        if let Err(e) = self.controller.execute() {
            lock(&self.pending).take();
            return Err(e);
        }
        Ok(())
    }

    fn await_execute(
        &self,
        sub: &StatusSubscription<PhaseStatus>,
    ) -> std::result::Result<PhaseStatus, TrajError> {
        let timeout = self.timeouts.for_phase(Phase::Execute);
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(TrajError::Cancelled);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(TrajError::PhaseTimeout {
                    phase: Phase::Execute,
                    waited_ms: duration_ms(elapsed),
                });
            }
            match sub.recv_timeout(wait_slice(timeout - elapsed, self.timeouts.poll())) {
                Ok(status) => return Ok(status),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TrajError::Device {
                        phase: Phase::Execute,
                        message: "execute notifications closed".into(),
                    });
                }
            }
        }
    }

    /// Wait for the running move, then read positions back when enabled.
    pub fn continuous_move_complete(&self) -> Result<()> {
        let sub = lock(&self.pending)
            .take()
            .ok_or_else(|| TrajError::Config("no continuous move in progress".into()))?;
        let status = self.await_execute(&sub)?;
        drop(sub);
        if !status.is_success() {
            if status == PhaseStatus::Abort {
                self.invalidate_build();
            }
            return Err(TrajError::PhaseFailed {
                phase: Phase::Execute,
                status,
                message: self.controller.phase(Phase::Execute).message,
            }
            .into());
        }
        tracing::debug!(axis = self.axis, "move complete");
        if !self.cfg.read_back {
            return Ok(());
        }
        self.controller.read()?;
        let snap = self.wait_phase(Phase::Read)?;
        if !snap.status.is_success() {
            return Err(TrajError::PhaseFailed {
                phase: Phase::Read,
                status: snap.status,
                message: snap.message,
            }
            .into());
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    /// Abort the move and drop the build cache.
    pub fn stop(&self) -> Result<()> {
        self.invalidate_build();
        self.controller.stop()
    }

    pub fn number_of_data_points(&self) -> usize {
        self.continuous_parameters().map_or(0, |p| p.points)
    }

    /// Nominal position of detector frame `frame`.
    pub fn calculate_energy_or_position(&self, frame: usize) -> Result<f64> {
        let p = self.require_params()?;
        Ok(p.start + frame as f64 * (p.end - p.start) / p.points as f64)
    }

    pub fn at_scan_line_end(&self) {
        if !self.cfg.two_d_mode {
            self.invalidate_build();
        }
    }

    pub fn at_scan_end(&self) {
        self.invalidate_build();
    }
}

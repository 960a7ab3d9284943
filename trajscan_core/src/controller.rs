//! Phase state machine of a trajectory device.
//!
//! ## Ordering
//!
//! All phase state lives in one `Mutex<TrackerState>` paired with a
//! `Condvar`. Completion callbacks and monitors arrive on channel-layer
//! threads and only touch that state under the lock:
//!
//! 1. `begin` (caller thread): phase -> `Busy`, status -> `Undefined`.
//! 2. Monitors (channel thread): record the reported status, device state
//!    label and message. They never resolve a phase.
//! 3. Completion (channel thread): status resolved from the status channel,
//!    Read results stored, phase -> `Done`, completion counter bumped,
//!    `notify_all`. Execute subscribers are notified after the lock is
//!    released.
//!
//! Waiters re-check the phase state under the lock after every wake-up.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use trajscan_traits::{
    AXIS_SLOTS, ArrayChannel, ChannelFactory, FloatChannel, IntChannel, PutStatus, Subscription,
    TextChannel, TrajectoryPvNames,
};

use crate::config::{ControllerLimits, Timeouts};
use crate::error::{Result, TrajError};
use crate::hw_error::map_channel_error;
use crate::observer::{StatusBus, StatusSubscription};
use crate::status::{Phase, PhaseSnapshot, PhaseState, PhaseStatus};
use crate::util::{CancelToken, duration_ms, wait_slice};

/// One of the device's motion axis slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSlot {
    pub enabled: bool,
    pub trajectory: Vec<f64>,
    /// Populated by a successful Read; overwritten on each Read.
    pub actual_positions: Vec<f64>,
    pub name: String,
}

/// Control surface of a trajectory device.
///
/// Setters are single remote writes; `build`, `execute` and `read` return
/// once the phase trigger is issued. Outcomes are observed through
/// [`TrajectoryController::phase`], [`TrajectoryController::wait_for`] and the
/// Execute subscription.
pub trait TrajectoryController: Send + Sync {
    fn limits(&self) -> &ControllerLimits;

    /// Enable or disable axis `index` (1-based) and load its trajectory.
    fn configure_axis(&self, index: usize, enabled: bool, trajectory: &[f64]) -> Result<()>;
    fn set_axis_enabled(&self, index: usize, enabled: bool) -> Result<()>;
    fn axis_name(&self, index: usize) -> Result<String>;

    fn set_element_count(&self, n: usize) -> Result<()>;
    fn set_pulse_count(&self, n: usize) -> Result<()>;
    /// 1-based element numbers, `start < stop`.
    fn set_pulse_window(&self, start: usize, stop: usize) -> Result<()>;
    fn set_time(&self, seconds: f64) -> Result<()>;

    fn build(&self) -> Result<()>;
    fn execute(&self) -> Result<()>;
    fn read(&self) -> Result<()>;
    /// Request an abort of the running move. Always allowed.
    fn stop(&self) -> Result<()>;

    fn phase(&self, phase: Phase) -> PhaseSnapshot;

    /// Block until `phase` is not `Busy`.
    fn wait_for(
        &self,
        phase: Phase,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<PhaseSnapshot>;

    fn subscribe_execute(&self) -> StatusSubscription<PhaseStatus>;

    fn actual_positions(&self, index: usize) -> Result<Vec<f64>>;
    fn actual_pulse_count(&self) -> usize;

    fn is_building(&self) -> bool {
        self.phase(Phase::Build).state == PhaseState::Busy
    }

    fn is_busy(&self) -> bool {
        self.is_building() || self.phase(Phase::Execute).state == PhaseState::Busy
    }

    fn is_reading(&self) -> bool {
        self.phase(Phase::Read).state == PhaseState::Busy
    }
}

/// Map a 1-based axis index to a slot offset.
pub(crate) fn slot(index: usize) -> std::result::Result<usize, TrajError> {
    if (1..=AXIS_SLOTS).contains(&index) {
        Ok(index - 1)
    } else {
        Err(TrajError::AxisRange {
            index,
            max: AXIS_SLOTS,
        })
    }
}

pub(crate) fn check_element_count(
    limits: &ControllerLimits,
    n: usize,
) -> std::result::Result<(), TrajError> {
    if (1..=limits.max_elements).contains(&n) {
        Ok(())
    } else {
        Err(TrajError::out_of_range(
            "element count",
            n,
            format!("1..={}", limits.max_elements),
        ))
    }
}

pub(crate) fn check_pulse_count(
    limits: &ControllerLimits,
    n: usize,
) -> std::result::Result<(), TrajError> {
    if (1..=limits.max_pulses).contains(&n) {
        Ok(())
    } else {
        Err(TrajError::out_of_range(
            "pulse count",
            n,
            format!("1..={}", limits.max_pulses),
        ))
    }
}

pub(crate) fn check_pulse_window(
    limits: &ControllerLimits,
    start: usize,
    stop: usize,
) -> std::result::Result<(), TrajError> {
    if start >= 1 && start < stop && stop <= limits.max_elements {
        Ok(())
    } else {
        Err(TrajError::out_of_range(
            "pulse window",
            format!("{start}..{stop}"),
            format!("1 <= start < stop <= {}", limits.max_elements),
        ))
    }
}

pub(crate) fn check_time(seconds: f64) -> std::result::Result<(), TrajError> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(TrajError::out_of_range("time", seconds, "finite and > 0"))
    }
}

#[derive(Debug, Default)]
struct PhaseRecord {
    snapshot: PhaseSnapshot,
    /// Last status seen by the monitor; used when the completion-time get fails.
    reported: PhaseStatus,
}

#[derive(Debug)]
struct TrackerState {
    phases: [PhaseRecord; 3],
    axes: [AxisSlot; AXIS_SLOTS],
    actual_pulses: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Locked phase bookkeeping shared by the controller implementations and
/// their completion callbacks.
pub(crate) struct PhaseTracker {
    state: Mutex<TrackerState>,
    cv: Condvar,
    execute_bus: StatusBus<PhaseStatus>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                phases: Default::default(),
                axes: std::array::from_fn(|_| AxisSlot::default()),
                actual_pulses: 0,
            }),
            cv: Condvar::new(),
            execute_bus: StatusBus::new(),
        }
    }

    /// Mark `phase` Busy with an Undefined status. Fails when a different
    /// phase is still in flight.
    pub(crate) fn begin(&self, phase: Phase) -> std::result::Result<(), TrajError> {
        let mut g = lock(&self.state);
        if let Some(busy) = Phase::ALL
            .into_iter()
            .find(|p| *p != phase && g.phases[p.index()].snapshot.state == PhaseState::Busy)
        {
            return Err(TrajError::PhaseInFlight {
                requested: phase,
                busy,
            });
        }
        let snap = &mut g.phases[phase.index()].snapshot;
        snap.state = PhaseState::Busy;
        snap.status = PhaseStatus::Undefined;
        tracing::debug!(%phase, "phase busy");
        Ok(())
    }

    /// Resolve `phase`: record the outcome, wake waiters, then fan out
    /// Execute outcomes.
    pub(crate) fn complete(&self, phase: Phase, status: PhaseStatus, message: Option<String>) {
        let (message, completions) = {
            let mut g = lock(&self.state);
            let rec = &mut g.phases[phase.index()];
            if let Some(m) = message {
                rec.snapshot.message = m;
            }
            rec.snapshot.status = status;
            rec.snapshot.state = PhaseState::Done;
            rec.snapshot.completions += 1;
            (rec.snapshot.message.clone(), rec.snapshot.completions)
        };
        self.cv.notify_all();
        tracing::debug!(%phase, %status, completions, "phase done");
        match status {
            PhaseStatus::Success => {}
            PhaseStatus::Abort => tracing::warn!(%phase, %status, message = %message, "phase aborted"),
            _ => tracing::error!(%phase, %status, message = %message, "phase did not succeed"),
        }
        if phase == Phase::Execute {
            let delivered = self.execute_bus.publish(status);
            tracing::trace!(delivered, "execute outcome published");
        }
    }

    pub(crate) fn snapshot(&self, phase: Phase) -> PhaseSnapshot {
        lock(&self.state).phases[phase.index()].snapshot.clone()
    }

    pub(crate) fn reported_status(&self, phase: Phase) -> PhaseStatus {
        lock(&self.state).phases[phase.index()].reported
    }

    pub(crate) fn on_status(&self, phase: Phase, raw: i32) {
        let status = PhaseStatus::from_raw(phase, raw);
        tracing::trace!(%phase, raw, %status, "status monitor");
        lock(&self.state).phases[phase.index()].reported = status;
    }

    pub(crate) fn on_device_state(&self, phase: Phase, raw: i32) {
        let label = phase.device_state_label(raw);
        tracing::trace!(%phase, raw, state = label, "state monitor");
        lock(&self.state).phases[phase.index()].snapshot.device_state = label.to_string();
    }

    pub(crate) fn on_message(&self, phase: Phase, message: &str) {
        tracing::trace!(%phase, message, "message monitor");
        lock(&self.state).phases[phase.index()].snapshot.message = message.to_string();
    }

    pub(crate) fn subscribe_execute(&self) -> StatusSubscription<PhaseStatus> {
        self.execute_bus.subscribe()
    }

    pub(crate) fn wait_for(
        &self,
        phase: Phase,
        timeout: Duration,
        poll: Duration,
        cancel: &CancelToken,
    ) -> std::result::Result<PhaseSnapshot, TrajError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut g = lock(&self.state);
        loop {
            let snap = &g.phases[phase.index()].snapshot;
            if snap.state != PhaseState::Busy {
                return Ok(snap.clone());
            }
            if cancel.is_cancelled() {
                return Err(TrajError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TrajError::PhaseTimeout {
                    phase,
                    waited_ms: duration_ms(now - started),
                });
            }
            let slice = wait_slice(deadline - now, poll);
            g = match self.cv.wait_timeout(g, slice) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub(crate) fn with_axis<R>(&self, offset: usize, f: impl FnOnce(&mut AxisSlot) -> R) -> R {
        f(&mut lock(&self.state).axes[offset])
    }

    pub(crate) fn axes(&self) -> Vec<AxisSlot> {
        lock(&self.state).axes.to_vec()
    }

    /// Store Read results. Called before the Read completes.
    pub(crate) fn store_actuals(&self, pulses: usize, actual: Vec<(usize, Vec<f64>)>) {
        let mut g = lock(&self.state);
        g.actual_pulses = pulses;
        for (offset, positions) in actual {
            g.axes[offset].actual_positions = positions;
        }
    }

    pub(crate) fn actual_pulses(&self) -> usize {
        lock(&self.state).actual_pulses
    }
}

struct PhaseChannels {
    trigger: IntChannel,
    status: IntChannel,
    state: IntChannel,
    message: TextChannel,
}

struct AxisChannels {
    enable: IntChannel,
    trajectory: ArrayChannel,
    actual: ArrayChannel,
    name: TextChannel,
}

struct Channels {
    element_count: IntChannel,
    pulse_count: IntChannel,
    pulse_start: IntChannel,
    pulse_stop: IntChannel,
    actual_pulses: IntChannel,
    time: FloatChannel,
    abort: IntChannel,
    phases: [PhaseChannels; 3],
    axes: Vec<AxisChannels>,
}

fn device(phase: Phase) -> impl Fn(trajscan_traits::ChannelError) -> eyre::Report {
    move |e| eyre::Report::new(map_channel_error(phase, e.as_ref()))
}

fn to_i32(what: &'static str, n: usize) -> std::result::Result<i32, TrajError> {
    i32::try_from(n).map_err(|_| TrajError::out_of_range(what, n, "fits in i32"))
}

impl Channels {
    fn open(factory: &dyn ChannelFactory, names: &TrajectoryPvNames) -> Result<Self> {
        let dev = device(Phase::Build);
        let phase = |trigger: String,
                     status: String,
                     state: String,
                     message: String|
         -> Result<PhaseChannels> {
            Ok(PhaseChannels {
                trigger: factory.int(&trigger).map_err(&dev)?,
                status: factory.int(&status).map_err(&dev)?,
                state: factory.int(&state).map_err(&dev)?,
                message: factory.text(&message).map_err(&dev)?,
            })
        };
        let phases = [
            phase(
                names.build(),
                names.build_status(),
                names.build_state(),
                names.build_message(),
            )?,
            phase(
                names.execute(),
                names.execute_status(),
                names.execute_state(),
                names.execute_message(),
            )?,
            phase(
                names.read(),
                names.read_status(),
                names.read_state(),
                names.read_message(),
            )?,
        ];
        let axes = (1..=AXIS_SLOTS)
            .map(|k| -> Result<AxisChannels> {
                Ok(AxisChannels {
                    enable: factory.int(&names.axis_move(k)).map_err(&dev)?,
                    trajectory: factory.array(&names.axis_trajectory(k)).map_err(&dev)?,
                    actual: factory.array(&names.axis_actual(k)).map_err(&dev)?,
                    name: factory.text(&names.axis_name(k)).map_err(&dev)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            element_count: factory.int(&names.element_count()).map_err(&dev)?,
            pulse_count: factory.int(&names.pulse_count()).map_err(&dev)?,
            pulse_start: factory.int(&names.pulse_start()).map_err(&dev)?,
            pulse_stop: factory.int(&names.pulse_stop()).map_err(&dev)?,
            actual_pulses: factory.int(&names.actual_pulses()).map_err(&dev)?,
            time: factory.float(&names.time()).map_err(&dev)?,
            abort: factory.int(&names.abort()).map_err(&dev)?,
            phases,
            axes,
        })
    }
}

/// Controller backed by remote channels from an injected [`ChannelFactory`].
pub struct ChannelTrajectoryController {
    names: TrajectoryPvNames,
    limits: ControllerLimits,
    timeouts: Timeouts,
    tracker: Arc<PhaseTracker>,
    channels: Arc<Channels>,
    _monitors: Vec<Subscription>,
}

impl ChannelTrajectoryController {
    /// Resolve every channel under `names` and start the status, state and
    /// message monitors.
    pub fn connect(
        factory: &dyn ChannelFactory,
        names: TrajectoryPvNames,
        limits: ControllerLimits,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let channels = Arc::new(Channels::open(factory, &names)?);
        let tracker = Arc::new(PhaseTracker::new());
        let mut monitors = Vec::with_capacity(9);
        for phase in Phase::ALL {
            let pc = &channels.phases[phase.index()];
            let dev = device(phase);
            let t = tracker.clone();
            monitors.push(
                pc.status
                    .subscribe(Box::new(move |raw: &i32| t.on_status(phase, *raw)))
                    .map_err(&dev)?,
            );
            let t = tracker.clone();
            monitors.push(
                pc.state
                    .subscribe(Box::new(move |raw: &i32| t.on_device_state(phase, *raw)))
                    .map_err(&dev)?,
            );
            let t = tracker.clone();
            monitors.push(
                pc.message
                    .subscribe(Box::new(move |m: &String| t.on_message(phase, m)))
                    .map_err(&dev)?,
            );
        }
        for (offset, axis) in channels.axes.iter().enumerate() {
            if let Ok(name) = axis.name.get() {
                tracker.with_axis(offset, |slot| slot.name = name);
            }
        }
        tracing::info!(prefix = %names.prefix(), "trajectory controller connected");
        Ok(Self {
            names,
            limits,
            timeouts,
            tracker,
            channels,
            _monitors: monitors,
        })
    }

    pub fn names(&self) -> &TrajectoryPvNames {
        &self.names
    }

    fn trigger(&self, phase: Phase) -> Result<()> {
        self.tracker.begin(phase)?;
        tracing::info!(%phase, "phase invoked");
        let tracker = self.tracker.clone();
        let channels = self.channels.clone();
        let pc = &self.channels.phases[phase.index()];
        pc.trigger
            .put_with_callback(
                1,
                Box::new(move |put| on_completion(&tracker, &channels, phase, put)),
            )
            .map_err(device(phase))
    }
}

/// Completion of a phase trigger, on the channel-layer thread.
fn on_completion(tracker: &PhaseTracker, channels: &Channels, phase: Phase, put: PutStatus) {
    let pc = &channels.phases[phase.index()];
    let status = match put {
        PutStatus::Failed => PhaseStatus::Failure,
        PutStatus::Normal => match pc.status.get() {
            Ok(raw) => PhaseStatus::from_raw(phase, raw),
            Err(e) => {
                let fallback = tracker.reported_status(phase);
                tracing::warn!(%phase, error = %e, %fallback, "status get failed; using monitored value");
                fallback
            }
        },
    };
    let message = pc.message.get().ok();
    if phase == Phase::Read && status.is_success() {
        refresh_actuals(tracker, channels);
    }
    tracker.complete(phase, status, message);
}

fn refresh_actuals(tracker: &PhaseTracker, channels: &Channels) {
    let pulses = match channels.actual_pulses.get() {
        Ok(p) => usize::try_from(p).unwrap_or(0),
        Err(e) => {
            tracing::warn!(error = %e, "actual pulse count unavailable");
            0
        }
    };
    let actual = tracker
        .axes()
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.enabled)
        .filter_map(|(offset, _)| match channels.axes[offset].actual.get() {
            Ok(pos) => Some((offset, pos)),
            Err(e) => {
                tracing::warn!(axis = offset + 1, error = %e, "actual positions unavailable");
                None
            }
        })
        .collect();
    tracker.store_actuals(pulses, actual);
}

impl TrajectoryController for ChannelTrajectoryController {
    fn limits(&self) -> &ControllerLimits {
        &self.limits
    }

    fn configure_axis(&self, index: usize, enabled: bool, trajectory: &[f64]) -> Result<()> {
        let offset = slot(index)?;
        let axis = &self.channels.axes[offset];
        axis.enable
            .put(i32::from(enabled))
            .map_err(device(Phase::Build))?;
        axis.trajectory
            .put(trajectory.to_vec())
            .map_err(device(Phase::Build))?;
        self.tracker.with_axis(offset, |s| {
            s.enabled = enabled;
            s.trajectory = trajectory.to_vec();
        });
        tracing::debug!(axis = index, enabled, elements = trajectory.len(), "axis configured");
        Ok(())
    }

    fn set_axis_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        let offset = slot(index)?;
        self.channels.axes[offset]
            .enable
            .put(i32::from(enabled))
            .map_err(device(Phase::Build))?;
        self.tracker.with_axis(offset, |s| s.enabled = enabled);
        Ok(())
    }

    fn axis_name(&self, index: usize) -> Result<String> {
        let offset = slot(index)?;
        match self.channels.axes[offset].name.get() {
            Ok(name) => {
                self.tracker.with_axis(offset, |s| s.name = name.clone());
                Ok(name)
            }
            Err(e) => {
                tracing::debug!(axis = index, error = %e, "axis name get failed; using cached");
                Ok(self.tracker.with_axis(offset, |s| s.name.clone()))
            }
        }
    }

    fn set_element_count(&self, n: usize) -> Result<()> {
        check_element_count(&self.limits, n)?;
        self.channels
            .element_count
            .put(to_i32("element count", n)?)
            .map_err(device(Phase::Build))
    }

    fn set_pulse_count(&self, n: usize) -> Result<()> {
        check_pulse_count(&self.limits, n)?;
        self.channels
            .pulse_count
            .put(to_i32("pulse count", n)?)
            .map_err(device(Phase::Build))
    }

    fn set_pulse_window(&self, start: usize, stop: usize) -> Result<()> {
        check_pulse_window(&self.limits, start, stop)?;
        let start_raw = to_i32("pulse start", start)?;
        let stop_raw = to_i32("pulse stop", stop)?;
        let dev = device(Phase::Build);
        self.channels.pulse_start.put(start_raw).map_err(&dev)?;
        self.channels.pulse_stop.put(stop_raw).map_err(&dev)?;
        // Some devices drop the stop element when it is written right after the start.
        let latched = self.channels.pulse_stop.get().map_err(&dev)?;
        if latched != stop_raw {
            tracing::warn!(wanted = stop, latched, "pulse stop not latched; rewriting");
            self.channels.pulse_stop.put(stop_raw).map_err(&dev)?;
        }
        Ok(())
    }

    fn set_time(&self, seconds: f64) -> Result<()> {
        check_time(seconds)?;
        let (tx, rx) = xch::bounded(1);
        self.channels
            .time
            .put_with_callback(
                seconds,
                Box::new(move |st| {
                    let _ = tx.send(st);
                }),
            )
            .map_err(device(Phase::Build))?;
        match rx.recv_timeout(self.timeouts.put()) {
            Ok(PutStatus::Normal) => Ok(()),
            Ok(PutStatus::Failed) => Err(TrajError::Device {
                phase: Phase::Build,
                message: format!("put of time {seconds} s failed"),
            }
            .into()),
            Err(_) => Err(TrajError::Device {
                phase: Phase::Build,
                message: format!(
                    "put of time {seconds} s not confirmed within {} ms",
                    self.timeouts.put_ms
                ),
            }
            .into()),
        }
    }

    fn build(&self) -> Result<()> {
        self.trigger(Phase::Build)
    }

    fn execute(&self) -> Result<()> {
        self.trigger(Phase::Execute)
    }

    fn read(&self) -> Result<()> {
        self.trigger(Phase::Read)
    }

    fn stop(&self) -> Result<()> {
        tracing::info!("trajectory abort requested");
        self.channels.abort.put(1).map_err(device(Phase::Execute))
    }

    fn phase(&self, phase: Phase) -> PhaseSnapshot {
        self.tracker.snapshot(phase)
    }

    fn wait_for(
        &self,
        phase: Phase,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<PhaseSnapshot> {
        Ok(self
            .tracker
            .wait_for(phase, timeout, self.timeouts.poll(), cancel)?)
    }

    fn subscribe_execute(&self) -> StatusSubscription<PhaseStatus> {
        self.tracker.subscribe_execute()
    }

    fn actual_positions(&self, index: usize) -> Result<Vec<f64>> {
        let offset = slot(index)?;
        Ok(self
            .tracker
            .with_axis(offset, |s| s.actual_positions.clone()))
    }

    fn actual_pulse_count(&self) -> usize {
        self.tracker.actual_pulses()
    }
}

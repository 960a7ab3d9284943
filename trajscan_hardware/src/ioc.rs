//! Simulated trajectory device.
//!
//! Installs put hooks on the BUILD, EXECUTE and READ trigger channels of a
//! [`SimChannelFactory`] and answers them the way a motion controller's
//! trajectory server does: state goes Busy, status and message are
//! published, state returns to Done and only then the put completes.
//! Motion is paced on an injected [`Clock`], so a `ManualClock` plays a
//! multi-second trajectory instantly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use trajscan_traits::{
    AXIS_SLOTS, Clock, ProcessVariable, PutStatus, Subscription, TrajectoryPvNames,
};

use crate::error::{HwError, Result};
use crate::pulses::sample_at_pulses;
use crate::pv::{Completion, SimChannelFactory, SimPv};
use crate::util::wait_until_with_timeout;

/// Raw status codes written to the *STATUS channels.
pub mod status_code {
    pub const UNDEFINED: i32 = 0;
    pub const SUCCESS: i32 = 1;
    pub const FAILURE: i32 = 2;
    pub const ABORT: i32 = 3;
    pub const TIMEOUT: i32 = 4;
}

/// Raw device states written to the *STATE channels.
pub mod state_code {
    pub const DONE: i32 = 0;
    pub const BUSY: i32 = 1;
    pub const MOVE_START: i32 = 1;
    pub const EXECUTING: i32 = 2;
    pub const FLYBACK: i32 = 3;
}

#[derive(Debug, Clone)]
pub struct IocSettings {
    pub max_elements: usize,
    pub max_pulses: usize,
    pub build_latency: Duration,
    pub read_latency: Duration,
    pub move_start: Duration,
    pub flyback: Duration,
    /// Number of sleeps a trajectory is split into; abort is checked between them.
    pub motion_steps: usize,
}

impl Default for IocSettings {
    fn default() -> Self {
        Self {
            max_elements: 1500,
            max_pulses: 60_000,
            build_latency: Duration::from_millis(20),
            read_latency: Duration::from_millis(20),
            move_start: Duration::from_millis(10),
            flyback: Duration::from_millis(10),
            motion_steps: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ExecutedMove {
    pulses: usize,
    actual: Vec<(usize, Vec<f64>)>,
}

#[derive(Debug, Default)]
struct Faults {
    build_message: Option<String>,
    execute_status: Option<i32>,
}

struct Inner {
    names: TrajectoryPvNames,
    factory: Arc<SimChannelFactory>,
    clock: Arc<dyn Clock>,
    settings: IocSettings,
    built: AtomicBool,
    abort: AtomicBool,
    executing: AtomicBool,
    executed: Mutex<Option<ExecutedMove>>,
    faults: Mutex<Faults>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn int(&self, name: String) -> Option<Arc<SimPv<i32>>> {
        match self.factory.pv::<i32>(&name) {
            Ok(pv) => Some(pv),
            Err(e) => {
                tracing::warn!(pv = %name, error = %e, "simulated device channel unavailable");
                None
            }
        }
    }

    fn read_int(&self, name: String) -> i32 {
        self.int(name).map(|pv| pv.value()).unwrap_or_default()
    }

    fn write_int(&self, name: String, value: i32) {
        if let Some(pv) = self.int(name) {
            pv.set(value);
        }
    }

    fn write_text(&self, name: String, value: &str) {
        match self.factory.pv::<String>(&name) {
            Ok(pv) => pv.set(value.to_string()),
            Err(e) => tracing::warn!(pv = %name, error = %e, "simulated device channel unavailable"),
        }
    }

    fn read_float(&self, name: String) -> f64 {
        self.factory
            .pv::<f64>(&name)
            .map(|pv| pv.value())
            .unwrap_or_default()
    }

    fn read_array(&self, name: String) -> Vec<f64> {
        self.factory
            .pv::<Vec<f64>>(&name)
            .map(|pv| pv.value())
            .unwrap_or_default()
    }

    fn write_array(&self, name: String, value: Vec<f64>) {
        if let Ok(pv) = self.factory.pv::<Vec<f64>>(&name) {
            pv.set(value);
        }
    }

    fn enabled_axes(&self) -> Vec<usize> {
        (1..=AXIS_SLOTS)
            .filter(|k| self.read_int(self.names.axis_move(*k)) != 0)
            .collect()
    }

    fn spawn(self: &Arc<Self>, job: impl FnOnce(Arc<Inner>) + Send + 'static) {
        let me = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("sim-trajectory".into())
            .spawn(move || job(me));
        match handle {
            Ok(h) => {
                let mut workers = lock(&self.workers);
                workers.retain(|w| !w.is_finished());
                workers.push(h);
            }
            Err(e) => tracing::error!(error = %e, "failed to spawn simulated device worker"),
        }
    }

    fn validate_build(&self) -> std::result::Result<(), String> {
        if let Some(msg) = lock(&self.faults).build_message.clone() {
            return Err(msg);
        }
        let nelm = self.read_int(self.names.element_count());
        if nelm < 1 || nelm as usize > self.settings.max_elements {
            return Err(format!("Invalid number of elements {nelm}"));
        }
        let nelm = nelm as usize;
        let npulses = self.read_int(self.names.pulse_count());
        if npulses < 1 || npulses as usize > self.settings.max_pulses {
            return Err(format!("Invalid number of pulses {npulses}"));
        }
        let sp = self.read_int(self.names.pulse_start());
        let ep = self.read_int(self.names.pulse_stop());
        if sp < 1 || ep < sp || ep as usize > nelm {
            return Err(format!("Invalid pulse window {sp}..{ep}"));
        }
        if self.read_float(self.names.time()) <= 0.0 {
            return Err("Invalid trajectory time".to_string());
        }
        let axes = self.enabled_axes();
        if axes.is_empty() {
            return Err("No motors enabled".to_string());
        }
        for k in axes {
            let len = self.read_array(self.names.axis_trajectory(k)).len();
            if len < nelm {
                return Err(format!("Motor {k} trajectory has {len} points, need {nelm}"));
            }
        }
        Ok(())
    }

    fn run_build(&self, done: Completion) {
        self.write_int(self.names.build_state(), state_code::BUSY);
        self.clock.sleep(self.settings.build_latency);
        let (status, message) = match self.validate_build() {
            Ok(()) => (status_code::SUCCESS, "Build complete".to_string()),
            Err(msg) => (status_code::FAILURE, msg),
        };
        self.built
            .store(status == status_code::SUCCESS, Ordering::SeqCst);
        tracing::debug!(status, message = %message, "simulated build finished");
        self.write_text(self.names.build_message(), &message);
        self.write_int(self.names.build_status(), status);
        self.write_int(self.names.build_state(), state_code::DONE);
        done.complete(PutStatus::Normal);
    }

    fn run_execute(&self, done: Completion) {
        self.write_int(self.names.execute_state(), state_code::MOVE_START);
        if !self.built.load(Ordering::SeqCst) {
            self.finish_execute(status_code::FAILURE, "Trajectory not built", done);
            return;
        }
        let nelm = self.read_int(self.names.element_count()).max(1) as usize;
        let npulses = self.read_int(self.names.pulse_count()).max(0) as usize;
        let sp = self.read_int(self.names.pulse_start()).max(1) as usize;
        let ep = self.read_int(self.names.pulse_stop()).max(1) as usize;
        let total = Duration::from_secs_f64(self.read_float(self.names.time()).max(0.0));
        let axes: Vec<(usize, Vec<f64>)> = self
            .enabled_axes()
            .into_iter()
            .map(|k| {
                let mut traj = self.read_array(self.names.axis_trajectory(k));
                traj.truncate(nelm);
                (k, traj)
            })
            .collect();

        self.clock.sleep(self.settings.move_start);
        self.write_int(self.names.execute_state(), state_code::EXECUTING);

        let steps = self.settings.motion_steps.max(1);
        let step = total / steps as u32;
        let mut completed = 0usize;
        while completed < steps {
            if self.abort.load(Ordering::SeqCst) {
                break;
            }
            self.clock.sleep(step);
            completed += 1;
        }
        let aborted = completed < steps;
        let pulses = if aborted {
            npulses * completed / steps
        } else {
            npulses
        };
        let actual = axes
            .into_iter()
            .map(|(k, traj)| {
                let mut pos = sample_at_pulses(&traj, sp, ep, npulses);
                pos.truncate(pulses);
                (k, pos)
            })
            .collect();
        *lock(&self.executed) = Some(ExecutedMove { pulses, actual });

        self.write_int(self.names.execute_state(), state_code::FLYBACK);
        self.clock.sleep(self.settings.flyback);
        let forced = lock(&self.faults).execute_status;
        let (status, message) = match (aborted, forced) {
            (true, _) => (status_code::ABORT, "Trajectory aborted"),
            (false, Some(code)) => (code, "Trajectory execute fault"),
            (false, None) => (status_code::SUCCESS, "Trajectory complete"),
        };
        self.finish_execute(status, message, done);
    }

    fn finish_execute(&self, status: i32, message: &str, done: Completion) {
        tracing::debug!(status, message, "simulated execute finished");
        self.write_text(self.names.execute_message(), message);
        self.write_int(self.names.execute_status(), status);
        self.write_int(self.names.execute_state(), state_code::DONE);
        self.executing.store(false, Ordering::SeqCst);
        done.complete(PutStatus::Normal);
    }

    fn run_read(&self, done: Completion) {
        self.write_int(self.names.read_state(), state_code::BUSY);
        self.clock.sleep(self.settings.read_latency);
        let executed = lock(&self.executed).clone();
        let (status, message) = match executed {
            None => (status_code::FAILURE, "No trajectory executed"),
            Some(mv) => {
                self.write_int(
                    self.names.actual_pulses(),
                    i32::try_from(mv.pulses).unwrap_or(i32::MAX),
                );
                for (k, pos) in mv.actual {
                    self.write_array(self.names.axis_actual(k), pos);
                }
                (status_code::SUCCESS, "Read complete")
            }
        };
        self.write_text(self.names.read_message(), message);
        self.write_int(self.names.read_status(), status);
        self.write_int(self.names.read_state(), state_code::DONE);
        done.complete(PutStatus::Normal);
    }
}

/// Simulated trajectory device bound to a channel factory.
///
/// Dropping it aborts any running move, detaches the trigger hooks and
/// joins its worker threads.
pub struct SimTrajectoryIoc {
    inner: Arc<Inner>,
    _abort_monitor: Subscription,
}

impl SimTrajectoryIoc {
    pub fn attach(
        factory: Arc<SimChannelFactory>,
        names: TrajectoryPvNames,
        clock: Arc<dyn Clock>,
        settings: IocSettings,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            names,
            factory,
            clock,
            settings,
            built: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            executed: Mutex::new(None),
            faults: Mutex::new(Faults::default()),
            workers: Mutex::new(Vec::new()),
        });
        let n = &inner.names;
        for k in 1..=AXIS_SLOTS {
            let name = inner.factory.pv::<String>(&n.axis_name(k))?;
            if name.value().is_empty() {
                name.set(format!("M{k}"));
            }
        }
        for pv in [n.build_status(), n.execute_status(), n.read_status()] {
            inner.factory.pv::<i32>(&pv)?;
        }

        let weak = Arc::downgrade(&inner);
        inner
            .factory
            .pv::<i32>(&n.build())?
            .set_put_hook(Arc::new(move |_v: &i32, done: Completion| {
                if let Some(inner) = weak.upgrade() {
                    inner.spawn(move |me| me.run_build(done));
                }
            }));
        let weak = Arc::downgrade(&inner);
        inner
            .factory
            .pv::<i32>(&n.execute())?
            .set_put_hook(Arc::new(move |_v: &i32, done: Completion| {
                if let Some(inner) = weak.upgrade() {
                    inner.abort.store(false, Ordering::SeqCst);
                    inner.executing.store(true, Ordering::SeqCst);
                    inner.spawn(move |me| me.run_execute(done));
                }
            }));
        let weak = Arc::downgrade(&inner);
        inner
            .factory
            .pv::<i32>(&n.read())?
            .set_put_hook(Arc::new(move |_v: &i32, done: Completion| {
                if let Some(inner) = weak.upgrade() {
                    inner.spawn(move |me| me.run_read(done));
                }
            }));

        let weak = Arc::downgrade(&inner);
        let abort_monitor = inner
            .factory
            .pv::<i32>(&n.abort())?
            .subscribe(Box::new(move |v: &i32| {
                if *v != 0 {
                    if let Some(inner) = weak.upgrade() {
                        tracing::info!("simulated device abort requested");
                        inner.abort.store(true, Ordering::SeqCst);
                    }
                }
            }))
            .map_err(|_| HwError::Disconnected(n.abort()))?;

        tracing::info!(prefix = %inner.names.prefix(), "simulated trajectory device attached");
        Ok(Self {
            inner,
            _abort_monitor: abort_monitor,
        })
    }

    pub fn names(&self) -> &TrajectoryPvNames {
        &self.inner.names
    }

    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::SeqCst)
    }

    /// Make every following build fail with `message`, or restore normal
    /// validation with `None`.
    pub fn fail_builds(&self, message: Option<&str>) {
        lock(&self.inner.faults).build_message = message.map(str::to_string);
    }

    /// Force the final status of every following (non-aborted) execute.
    pub fn force_execute_status(&self, status: Option<i32>) {
        lock(&self.inner.faults).execute_status = status;
    }

    /// Block until no simulated move is running, measured on `clock`.
    pub fn wait_idle(&self, clock: &dyn Clock, timeout: Duration) -> Result<()> {
        wait_until_with_timeout(
            clock,
            || !self.is_executing(),
            timeout,
            Duration::from_millis(5),
        )
    }
}

impl Drop for SimTrajectoryIoc {
    fn drop(&mut self) {
        self.inner.abort.store(true, Ordering::SeqCst);
        let n = &self.inner.names;
        for trigger in [n.build(), n.execute(), n.read()] {
            if let Ok(pv) = self.inner.factory.pv::<i32>(&trigger) {
                pv.clear_put_hook();
            }
        }
        let workers: Vec<JoinHandle<()>> = lock(&self.inner.workers).drain(..).collect();
        for w in workers {
            let _ = w.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use trajscan_traits::{ChannelFactory, ManualClock};

    fn setup() -> (Arc<SimChannelFactory>, SimTrajectoryIoc, TrajectoryPvNames) {
        let factory = Arc::new(SimChannelFactory::new());
        let names = TrajectoryPvNames::new("SIM:TRAJ:");
        let ioc = SimTrajectoryIoc::attach(
            factory.clone(),
            names.clone(),
            Arc::new(ManualClock::new()),
            IocSettings::default(),
        )
        .unwrap();
        (factory, ioc, names)
    }

    fn trigger(factory: &SimChannelFactory, name: &str) -> PutStatus {
        let (tx, rx) = mpsc::channel();
        factory
            .int(name)
            .unwrap()
            .put_with_callback(1, Box::new(move |st| tx.send(st).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn configure(factory: &SimChannelFactory, names: &TrajectoryPvNames) {
        let path: Vec<f64> = (0..10).map(|i| i as f64).collect();
        factory.pv::<i32>(&names.element_count()).unwrap().set(10);
        factory.pv::<i32>(&names.pulse_count()).unwrap().set(5);
        factory.pv::<i32>(&names.pulse_start()).unwrap().set(2);
        factory.pv::<i32>(&names.pulse_stop()).unwrap().set(9);
        factory.pv::<f64>(&names.time()).unwrap().set(1.0);
        factory.pv::<i32>(&names.axis_move(1)).unwrap().set(1);
        factory
            .pv::<Vec<f64>>(&names.axis_trajectory(1))
            .unwrap()
            .set(path);
    }

    #[test]
    fn full_cycle_reports_success_and_positions() {
        let (factory, _ioc, names) = setup();
        configure(&factory, &names);
        assert_eq!(trigger(&factory, &names.build()), PutStatus::Normal);
        assert_eq!(
            factory.pv::<i32>(&names.build_status()).unwrap().value(),
            status_code::SUCCESS
        );
        trigger(&factory, &names.execute());
        assert_eq!(
            factory.pv::<i32>(&names.execute_status()).unwrap().value(),
            status_code::SUCCESS
        );
        trigger(&factory, &names.read());
        let actual = factory.pv::<Vec<f64>>(&names.axis_actual(1)).unwrap().value();
        assert_eq!(actual.len(), 5);
        assert_eq!(factory.pv::<i32>(&names.actual_pulses()).unwrap().value(), 5);
        assert!((actual[0] - 1.0).abs() < 1e-9);
        assert!((actual[4] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn build_rejects_short_trajectory() {
        let (factory, _ioc, names) = setup();
        configure(&factory, &names);
        factory.pv::<i32>(&names.element_count()).unwrap().set(20);
        factory.pv::<i32>(&names.pulse_stop()).unwrap().set(19);
        trigger(&factory, &names.build());
        assert_eq!(
            factory.pv::<i32>(&names.build_status()).unwrap().value(),
            status_code::FAILURE
        );
        let msg = factory.pv::<String>(&names.build_message()).unwrap().value();
        assert!(msg.contains("Motor 1"), "{msg}");
    }

    #[test]
    fn execute_without_build_fails() {
        let (factory, _ioc, names) = setup();
        trigger(&factory, &names.execute());
        assert_eq!(
            factory.pv::<i32>(&names.execute_status()).unwrap().value(),
            status_code::FAILURE
        );
    }

    #[test]
    fn read_before_execute_fails() {
        let (factory, _ioc, names) = setup();
        trigger(&factory, &names.read());
        assert_eq!(
            factory.pv::<i32>(&names.read_status()).unwrap().value(),
            status_code::FAILURE
        );
    }

    #[test]
    fn forced_execute_status_is_reported() {
        let (factory, ioc, names) = setup();
        configure(&factory, &names);
        trigger(&factory, &names.build());
        ioc.force_execute_status(Some(status_code::TIMEOUT));
        trigger(&factory, &names.execute());
        assert_eq!(
            factory.pv::<i32>(&names.execute_status()).unwrap().value(),
            status_code::TIMEOUT
        );
    }

    #[test]
    fn axis_names_get_defaults() {
        let (factory, _ioc, names) = setup();
        assert_eq!(factory.pv::<String>(&names.axis_name(3)).unwrap().value(), "M3");
    }
}

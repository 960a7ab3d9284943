#![allow(dead_code)]

use std::sync::Arc;

use trajscan_core::{
    AdapterCfg, CancelToken, ChannelTrajectoryController, ContinuousAxisAdapter,
    ContinuousParameters, ControllerLimits, DeferredPositionReader, MotionCfg, Timeouts,
};
use trajscan_hardware::{IocSettings, SimChannelFactory, SimTrajectoryIoc};
use trajscan_traits::{Clock, ManualClock, TrajectoryPvNames};

pub const PREFIX: &str = "TEST:TRAJ:";

/// Channel-backed controller wired to a simulated device on a manual clock.
pub struct Rig {
    pub factory: Arc<SimChannelFactory>,
    pub names: TrajectoryPvNames,
    pub ioc: SimTrajectoryIoc,
    pub controller: Arc<ChannelTrajectoryController>,
    pub timeouts: Timeouts,
    pub cancel: CancelToken,
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        build_ms: 2_000,
        execute_ms: 5_000,
        read_ms: 2_000,
        readback_ms: 2_000,
        poll_ms: 10,
        put_ms: 1_000,
    }
}

pub fn motion() -> MotionCfg {
    MotionCfg {
        acceleration_time_s: 0.1,
        element_count: 100,
    }
}

pub fn params() -> ContinuousParameters {
    ContinuousParameters {
        start: 0.0,
        end: 10.0,
        total_time: 1.0,
        points: 20,
    }
}

impl Rig {
    pub fn new() -> Self {
        Self::with_timeouts(fast_timeouts())
    }

    pub fn with_timeouts(timeouts: Timeouts) -> Self {
        Self::build(timeouts, Arc::new(ManualClock::new()))
    }

    /// Device paced by `clock`; a real clock makes moves take real time.
    pub fn build(timeouts: Timeouts, clock: Arc<dyn Clock>) -> Self {
        let factory = Arc::new(SimChannelFactory::new());
        let names = TrajectoryPvNames::new(PREFIX);
        let ioc = SimTrajectoryIoc::attach(
            factory.clone(),
            names.clone(),
            clock,
            IocSettings::default(),
        )
        .expect("attach simulated device");
        let controller = Arc::new(
            ChannelTrajectoryController::connect(
                factory.as_ref(),
                names.clone(),
                ControllerLimits::default(),
                timeouts,
            )
            .expect("connect controller"),
        );
        Self {
            factory,
            names,
            ioc,
            controller,
            timeouts,
            cancel: CancelToken::new(),
        }
    }

    pub fn adapter(&self, cfg: AdapterCfg) -> ContinuousAxisAdapter<ChannelTrajectoryController> {
        ContinuousAxisAdapter::new(
            self.controller.clone(),
            1,
            motion(),
            self.timeouts,
            cfg,
            self.cancel.clone(),
        )
        .expect("adapter")
    }

    pub fn reader(&self, points_per_row: usize) -> DeferredPositionReader<ChannelTrajectoryController> {
        DeferredPositionReader::new(
            self.controller.clone(),
            1,
            points_per_row,
            self.timeouts,
            self.cancel.clone(),
        )
    }

    pub fn build_puts(&self) -> usize {
        self.factory
            .pv::<i32>(&self.names.build())
            .expect("build pv")
            .put_count()
    }
}

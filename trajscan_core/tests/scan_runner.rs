mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Rig, fast_timeouts, motion, params};
use trajscan_core::{
    AdapterCfg, CancelToken, ContinuousAxisAdapter, ControllerLimits, DeferredPositionReader,
    Phase, SimulatedTrajectoryController, SimulationCfg, TrajError, TrajectoryController, run_line,
    run_scan,
};
use trajscan_traits::ManualClock;

#[test]
fn scan_over_channels_skips_repeat_builds() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: true,
    });
    let reader = rig.reader(1);
    let reports = run_scan(&adapter, &reader, params(), 3, &rig.cancel).unwrap();

    assert_eq!(reports.len(), 3);
    assert!(!reports[0].build_skipped);
    assert!(reports[1..].iter().all(|r| r.build_skipped));
    assert_eq!(rig.build_puts(), 1);
    for (i, r) in reports.iter().enumerate() {
        assert_eq!(r.line, i);
        assert_eq!(r.positions.len(), 20);
        assert_eq!(r.requested.len(), 20);
        assert_eq!(r.pulses, 20);
        // Positions land inside the scan range, off nominal by less than the range.
        assert!(r.max_deviation() < 10.0);
    }
    assert_eq!(reports[0].positions, reports[2].positions);
    assert_eq!(reader.rows_buffered(), 3);
    assert!(!adapter.build_is_cached());
}

#[test]
fn scan_over_simulated_controller() {
    let cancel = CancelToken::new();
    let controller = Arc::new(SimulatedTrajectoryController::new(
        ControllerLimits::default(),
        fast_timeouts(),
        SimulationCfg {
            build_latency_ms: 1,
            read_latency_ms: 1,
            speed_factor: 100.0,
        },
        Arc::new(ManualClock::new()),
        &[],
    ));
    let adapter = ContinuousAxisAdapter::new(
        controller.clone(),
        2,
        motion(),
        fast_timeouts(),
        AdapterCfg {
            two_d_mode: false,
            read_back: true,
        },
        cancel.clone(),
    )
    .unwrap();
    let reader = DeferredPositionReader::new(controller, 2, 20, fast_timeouts(), cancel.clone());
    let reports = run_scan(&adapter, &reader, params(), 2, &cancel).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.build_skipped && r.positions.len() == 20));
}

#[test]
fn cancelled_line_is_not_started() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg::default());
    let reader = rig.reader(20);
    adapter.set_continuous_parameters(params());
    rig.cancel.cancel();
    let err = run_line(&adapter, &reader, 0, &rig.cancel).unwrap_err();
    assert_eq!(err.downcast_ref::<TrajError>(), Some(&TrajError::Cancelled));
    assert_eq!(rig.build_puts(), 0);
}

#[test]
fn failed_line_still_clears_the_build_cache() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: true,
    });
    let reader = rig.reader(20);
    rig.ioc
        .force_execute_status(Some(trajscan_hardware::status_code::FAILURE));
    let err = run_scan(&adapter, &reader, params(), 2, &rig.cancel).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TrajError>(),
        Some(TrajError::PhaseFailed { .. })
    ));
    assert!(!adapter.build_is_cached());
}

#[test]
fn leftover_execute_is_bounded_by_the_execute_timeout() {
    let mut timeouts = fast_timeouts();
    timeouts.execute_ms = 150;
    let rig = Rig::with_timeouts(timeouts);
    let adapter = rig.adapter(AdapterCfg::default());
    let reader = rig.reader(20);
    adapter.set_continuous_parameters(params());

    // An execute from an earlier line whose completion never arrives.
    rig.factory
        .pv::<i32>(&rig.names.execute())
        .unwrap()
        .swallow_callbacks(true);
    rig.controller.execute().unwrap();

    let started = Instant::now();
    let err = run_line(&adapter, &reader, 0, &rig.cancel).unwrap_err();
    let waited = started.elapsed();
    assert!(matches!(
        err.downcast_ref::<TrajError>(),
        Some(TrajError::PhaseTimeout {
            phase: Phase::Execute,
            ..
        })
    ));
    assert!(waited >= Duration::from_millis(150));
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
}

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Rig, params};
use trajscan_core::{
    AdapterCfg, ChannelTrajectoryController, ContinuousAxisAdapter, ContinuousParameters,
    ErrorKind, Phase, PhaseState, PhaseStatus, TrajError, TrajectoryController,
    define_constant_velocity_path,
};
use trajscan_hardware::status_code;
use trajscan_traits::MonotonicClock;

fn traj_err(e: &eyre::Report) -> &TrajError {
    e.downcast_ref::<TrajError>().expect("typed error")
}

fn one_line(adapter: &ContinuousAxisAdapter<ChannelTrajectoryController>) {
    adapter.prepare_for_continuous_move().unwrap();
    adapter.perform_continuous_move().unwrap();
    adapter.continuous_move_complete().unwrap();
}

#[test]
fn two_d_mode_builds_once_for_identical_lines() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: true,
    });
    adapter.set_continuous_parameters(params());

    one_line(&adapter);
    adapter.at_scan_line_end();
    assert!(adapter.build_is_cached());
    one_line(&adapter);
    adapter.at_scan_line_end();

    assert_eq!(rig.build_puts(), 1);
    assert_eq!(rig.controller.phase(Phase::Execute).completions, 2);

    adapter.at_scan_end();
    assert!(!adapter.build_is_cached());
}

#[test]
fn one_d_mode_rebuilds_every_line() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg::default());
    adapter.set_continuous_parameters(params());
    for _ in 0..2 {
        one_line(&adapter);
        adapter.at_scan_line_end();
    }
    assert_eq!(rig.build_puts(), 2);
}

#[test]
fn changed_parameters_force_a_rebuild() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: false,
    });
    adapter.set_continuous_parameters(params());
    one_line(&adapter);
    adapter.set_continuous_parameters(ContinuousParameters {
        end: 20.0,
        ..params()
    });
    assert!(!adapter.build_is_cached());
    one_line(&adapter);
    assert_eq!(rig.build_puts(), 2);
}

#[test]
fn failed_build_reports_device_message_and_recovers() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: true,
    });
    adapter.set_continuous_parameters(params());

    rig.ioc.fail_builds(Some("Motor 1 following error"));
    let err = adapter.prepare_for_continuous_move().unwrap_err();
    match traj_err(&err) {
        TrajError::PhaseFailed {
            phase,
            status,
            message,
        } => {
            assert_eq!(*phase, Phase::Build);
            assert_eq!(*status, PhaseStatus::Failure);
            assert!(message.contains("following error"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!adapter.build_is_cached());
    for phase in [Phase::Execute, Phase::Read] {
        let snap = rig.controller.phase(phase);
        assert_eq!(snap.status, PhaseStatus::Undefined);
        assert_eq!(snap.state, PhaseState::Idle);
    }

    rig.ioc.fail_builds(None);
    one_line(&adapter);
    let snap = rig.controller.phase(Phase::Build);
    assert_eq!(snap.status, PhaseStatus::Success);
    assert_eq!(snap.completions, 2);
}

#[test]
fn rejected_trigger_write_leaves_phase_busy_and_retry_succeeds() {
    let rig = Rig::new();
    let build_pv = rig.factory.pv::<i32>(&rig.names.build()).unwrap();
    build_pv.reject_puts(true);

    let err = rig.controller.build().unwrap_err();
    assert!(
        matches!(traj_err(&err), TrajError::Device { phase: Phase::Build, .. }),
        "{err:?}"
    );
    assert_eq!(traj_err(&err).kind(), ErrorKind::Device);
    assert_eq!(rig.controller.phase(Phase::Build).state, PhaseState::Busy);
    assert!(rig.controller.is_building());

    build_pv.reject_puts(false);
    rig.controller.build().unwrap();
    let snap = rig
        .controller
        .wait_for(Phase::Build, Duration::from_secs(2), &rig.cancel)
        .unwrap();
    assert_eq!(snap.state, PhaseState::Done);
    assert_eq!(snap.completions, 1);
    assert_eq!(build_pv.put_count(), 1);
}

#[test]
fn unlatched_pulse_stop_is_written_again() {
    let rig = Rig::new();
    let stop_pv = rig.factory.pv::<i32>(&rig.names.pulse_stop()).unwrap();
    stop_pv.drop_next_puts(1);
    let adapter = rig.adapter(AdapterCfg::default());
    adapter.set_continuous_parameters(params());
    adapter.prepare_for_continuous_move().unwrap();

    let p = params();
    let m = common::motion();
    let traj = define_constant_velocity_path(
        p.start,
        p.end,
        p.total_time,
        m.element_count,
        m.acceleration_time_s,
    )
    .unwrap();
    assert_eq!(stop_pv.put_count(), 2);
    assert_eq!(stop_pv.value(), i32::try_from(traj.pulse_stop_element).unwrap());
    assert_eq!(
        rig.controller.phase(Phase::Build).status,
        PhaseStatus::Success
    );
}

#[test]
fn read_refreshes_actual_positions() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: false,
        read_back: true,
    });
    adapter.set_continuous_parameters(params());
    one_line(&adapter);

    let positions = rig.controller.actual_positions(1).unwrap();
    assert_eq!(positions.len(), 20);
    assert_eq!(rig.controller.actual_pulse_count(), 20);
    assert!(positions.windows(2).all(|w| w[1] > w[0]));
    assert!(positions.iter().all(|p| (0.0..=10.0).contains(p)));
    assert_eq!(rig.controller.phase(Phase::Read).device_state, "Done");
}

#[test]
fn forced_device_status_surfaces_as_phase_failure() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: true,
    });
    adapter.set_continuous_parameters(params());
    adapter.prepare_for_continuous_move().unwrap();
    rig.ioc.force_execute_status(Some(status_code::TIMEOUT));
    adapter.perform_continuous_move().unwrap();
    let err = adapter.continuous_move_complete().unwrap_err();
    assert!(matches!(
        traj_err(&err),
        TrajError::PhaseFailed {
            phase: Phase::Execute,
            status: PhaseStatus::Timeout,
            ..
        }
    ));
    // Only an abort discards the build.
    assert!(adapter.build_is_cached());
}

#[test]
fn unacknowledged_build_times_out_within_bound() {
    let mut timeouts = common::fast_timeouts();
    timeouts.build_ms = 150;
    let rig = Rig::with_timeouts(timeouts);
    rig.factory
        .pv::<i32>(&rig.names.build())
        .unwrap()
        .swallow_callbacks(true);
    let adapter = rig.adapter(AdapterCfg::default());
    adapter.set_continuous_parameters(params());

    let started = Instant::now();
    let err = adapter.prepare_for_continuous_move().unwrap_err();
    let waited = started.elapsed();
    assert!(matches!(
        traj_err(&err),
        TrajError::PhaseTimeout {
            phase: Phase::Build,
            ..
        }
    ));
    assert_eq!(traj_err(&err).kind(), ErrorKind::Timeout);
    assert!(waited >= Duration::from_millis(150));
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
}

#[test]
fn other_phase_rejected_while_one_is_in_flight() {
    let rig = Rig::new();
    rig.factory
        .pv::<i32>(&rig.names.build())
        .unwrap()
        .swallow_callbacks(true);
    rig.controller.build().unwrap();
    assert!(rig.controller.is_building());

    let err = rig.controller.execute().unwrap_err();
    assert_eq!(
        traj_err(&err),
        &TrajError::PhaseInFlight {
            requested: Phase::Execute,
            busy: Phase::Build,
        }
    );
    assert_eq!(traj_err(&err).kind(), ErrorKind::Busy);
    // Stop is never refused.
    rig.controller.stop().unwrap();
}

#[test]
fn stop_writes_abort_even_while_execute_is_pending() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: false,
    });
    adapter.set_continuous_parameters(params());
    adapter.prepare_for_continuous_move().unwrap();

    // Hold the execute completion so the move is observably running.
    rig.factory
        .pv::<i32>(&rig.names.execute())
        .unwrap()
        .swallow_callbacks(true);
    adapter.perform_continuous_move().unwrap();
    assert_eq!(rig.controller.phase(Phase::Execute).state, PhaseState::Busy);
    adapter.stop().unwrap();
    assert!(!adapter.build_is_cached());
    assert_eq!(rig.factory.pv::<i32>(&rig.names.abort()).unwrap().value(), 1);
}

#[test]
fn aborted_move_reports_abort_and_drops_the_build() {
    let mut timeouts = common::fast_timeouts();
    timeouts.execute_ms = 10_000;
    let rig = Rig::build(timeouts, Arc::new(MonotonicClock::new()));
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: false,
    });
    adapter.set_continuous_parameters(ContinuousParameters {
        total_time: 5.0,
        ..params()
    });
    adapter.prepare_for_continuous_move().unwrap();
    adapter.perform_continuous_move().unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert!(rig.ioc.is_executing());

    let started = Instant::now();
    adapter.stop().unwrap();
    let err = adapter.continuous_move_complete().unwrap_err();
    assert!(matches!(
        traj_err(&err),
        TrajError::PhaseFailed {
            phase: Phase::Execute,
            status: PhaseStatus::Abort,
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!adapter.build_is_cached());
    assert_eq!(rig.controller.phase(Phase::Execute).message, "Trajectory aborted");
}

#[test]
fn cancellation_ends_the_wait() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg::default());
    adapter.set_continuous_parameters(params());
    adapter.prepare_for_continuous_move().unwrap();
    rig.factory
        .pv::<i32>(&rig.names.execute())
        .unwrap()
        .swallow_callbacks(true);
    adapter.perform_continuous_move().unwrap();
    rig.cancel.cancel();
    let err = adapter.continuous_move_complete().unwrap_err();
    assert_eq!(traj_err(&err), &TrajError::Cancelled);
}

#[test]
fn execute_outcome_reaches_every_live_subscriber() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg {
        two_d_mode: true,
        read_back: false,
    });
    adapter.set_continuous_parameters(params());
    adapter.prepare_for_continuous_move().unwrap();

    let first = rig.controller.subscribe_execute();
    let second = rig.controller.subscribe_execute();
    rig.controller.subscribe_execute().unsubscribe();

    adapter.perform_continuous_move().unwrap();
    adapter.continuous_move_complete().unwrap();
    for sub in [&first, &second] {
        assert_eq!(
            sub.recv_timeout(Duration::from_secs(1)).unwrap(),
            PhaseStatus::Success
        );
        assert!(sub.try_recv().is_err());
    }
}

#[test]
fn energy_or_position_steps_linearly() {
    let rig = Rig::new();
    let adapter = rig.adapter(AdapterCfg::default());
    assert_eq!(adapter.number_of_data_points(), 0);
    assert!(adapter.calculate_energy_or_position(0).is_err());
    adapter.set_continuous_parameters(params());
    assert_eq!(adapter.number_of_data_points(), 20);
    assert!((adapter.calculate_energy_or_position(0).unwrap() - 0.0).abs() < 1e-12);
    assert!((adapter.calculate_energy_or_position(10).unwrap() - 5.0).abs() < 1e-12);
}

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use trajscan_hardware::{IocSettings, SimChannelFactory, SimTrajectoryIoc, status_code};
use trajscan_traits::{ChannelFactory, MonotonicClock, PutStatus, TrajectoryPvNames};

fn arm(factory: &SimChannelFactory, names: &TrajectoryPvNames, seconds: f64) {
    let path: Vec<f64> = (0..100).map(|i| i as f64 * 0.1).collect();
    factory.pv::<i32>(&names.element_count()).unwrap().set(100);
    factory.pv::<i32>(&names.pulse_count()).unwrap().set(50);
    factory.pv::<i32>(&names.pulse_start()).unwrap().set(1);
    factory.pv::<i32>(&names.pulse_stop()).unwrap().set(100);
    factory.pv::<f64>(&names.time()).unwrap().set(seconds);
    factory.pv::<i32>(&names.axis_move(2)).unwrap().set(1);
    factory
        .pv::<Vec<f64>>(&names.axis_trajectory(2))
        .unwrap()
        .set(path);
}

fn trigger(factory: &SimChannelFactory, name: &str) -> mpsc::Receiver<PutStatus> {
    let (tx, rx) = mpsc::channel();
    factory
        .int(name)
        .unwrap()
        .put_with_callback(1, Box::new(move |st| {
            let _ = tx.send(st);
        }))
        .unwrap();
    rx
}

#[test]
fn abort_stops_a_running_move_early() {
    let factory = Arc::new(SimChannelFactory::new());
    let names = TrajectoryPvNames::new("T:");
    let settings = IocSettings {
        build_latency: Duration::from_millis(1),
        read_latency: Duration::from_millis(1),
        move_start: Duration::from_millis(1),
        flyback: Duration::from_millis(1),
        ..IocSettings::default()
    };
    let ioc = SimTrajectoryIoc::attach(
        factory.clone(),
        names.clone(),
        Arc::new(MonotonicClock::new()),
        settings,
    )
    .unwrap();
    arm(&factory, &names, 5.0);
    trigger(&factory, &names.build())
        .recv_timeout(Duration::from_secs(2))
        .unwrap();

    let started = Instant::now();
    let done = trigger(&factory, &names.execute());
    assert!(ioc.is_executing());
    thread::sleep(Duration::from_millis(150));
    factory.int(&names.abort()).unwrap().put(1).unwrap();
    done.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        factory.pv::<i32>(&names.execute_status()).unwrap().value(),
        status_code::ABORT
    );
    assert!(!ioc.is_executing());

    trigger(&factory, &names.read())
        .recv_timeout(Duration::from_secs(2))
        .unwrap();
    let pulses = factory.pv::<i32>(&names.actual_pulses()).unwrap().value();
    assert!(pulses < 50, "aborted move emitted {pulses} pulses");
}

#[test]
fn wait_idle_returns_after_move() {
    let factory = Arc::new(SimChannelFactory::new());
    let names = TrajectoryPvNames::new("T:");
    let clock = Arc::new(MonotonicClock::new());
    let ioc = SimTrajectoryIoc::attach(
        factory.clone(),
        names.clone(),
        clock.clone(),
        IocSettings::default(),
    )
    .unwrap();
    arm(&factory, &names, 0.1);
    trigger(&factory, &names.build())
        .recv_timeout(Duration::from_secs(2))
        .unwrap();
    let _done = trigger(&factory, &names.execute());
    ioc.wait_idle(clock.as_ref(), Duration::from_secs(2)).unwrap();
    assert_eq!(
        factory.pv::<i32>(&names.execute_status()).unwrap().value(),
        status_code::SUCCESS
    );
}

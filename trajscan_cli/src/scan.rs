//! Device assembly plus the path, scan and self-check commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use serde_json::{Value, json};
use trajscan_config::{Config, DeviceKind};
use trajscan_core::error::Result;
use trajscan_core::{
    AdapterCfg, CancelToken, ChannelTrajectoryController, ContinuousAxisAdapter,
    ContinuousParameters, ControllerLimits, DeferredPositionReader, LineReport, MotionCfg,
    SimulatedTrajectoryController, SimulationCfg, Timeouts, TrajError, TrajectoryController,
    Trajectory, define_constant_velocity_path, define_oscillation_path, run_scan,
};
use trajscan_hardware::{IocSettings, SimChannelFactory, SimTrajectoryIoc};
use trajscan_traits::{AXIS_SLOTS, MonotonicClock, TrajectoryPvNames};

use crate::output::write_json_atomic;

/// A controller plus whatever keeps its device alive.
pub struct Station {
    pub controller: Arc<dyn TrajectoryController>,
    pub cancel: CancelToken,
    pub kind: DeviceKind,
    // Dropped after `controller`; joins the simulated device's workers.
    _ioc: Option<SimTrajectoryIoc>,
}

pub fn open_station(cfg: &Config) -> Result<Station> {
    let limits: ControllerLimits = (&cfg.limits).into();
    let timeouts: Timeouts = (&cfg.timeouts).into();
    let sim: SimulationCfg = (&cfg.simulation).into();
    let cancel = CancelToken::new();
    match cfg.device.kind {
        DeviceKind::SimulatedChannels => {
            let factory = Arc::new(SimChannelFactory::new());
            let names = TrajectoryPvNames::new(cfg.device.prefix.clone());
            for (i, name) in cfg.axes.names.iter().enumerate() {
                factory.pv::<String>(&names.axis_name(i + 1))?.set(name.clone());
            }
            let ioc = SimTrajectoryIoc::attach(
                factory.clone(),
                names.clone(),
                Arc::new(MonotonicClock::new()),
                IocSettings {
                    max_elements: limits.max_elements,
                    max_pulses: limits.max_pulses,
                    build_latency: Duration::from_millis(sim.build_latency_ms),
                    read_latency: Duration::from_millis(sim.read_latency_ms),
                    ..IocSettings::default()
                },
            )
            .wrap_err("attach simulated trajectory device")?;
            let controller =
                ChannelTrajectoryController::connect(factory.as_ref(), names, limits, timeouts)?;
            Ok(Station {
                controller: Arc::new(controller),
                cancel,
                kind: cfg.device.kind,
                _ioc: Some(ioc),
            })
        }
        DeviceKind::Simulated => {
            let controller = SimulatedTrajectoryController::new(
                limits,
                timeouts,
                sim,
                Arc::new(MonotonicClock::new()),
                &cfg.axes.names,
            );
            Ok(Station {
                controller: Arc::new(controller),
                cancel,
                kind: cfg.device.kind,
                _ioc: None,
            })
        }
    }
}

/// Resolve `--axis`: configured name, then device axis name, then slot number.
pub fn resolve_axis(cfg: &Config, controller: &dyn TrajectoryController, axis: &str) -> Result<usize> {
    if let Some(slot) = cfg.axis_slot(axis) {
        return Ok(slot);
    }
    for k in 1..=AXIS_SLOTS {
        if controller.axis_name(k)? == axis {
            return Ok(k);
        }
    }
    if let Ok(k) = axis.parse::<usize>() {
        if (1..=AXIS_SLOTS).contains(&k) {
            return Ok(k);
        }
        return Err(TrajError::AxisRange {
            index: k,
            max: AXIS_SLOTS,
        }
        .into());
    }
    Err(TrajError::Config(format!("unknown axis '{axis}'")).into())
}

pub struct PathArgs {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub elements: Option<usize>,
    pub accel: Option<f64>,
    pub oscillate: Option<usize>,
    pub dump: bool,
}

fn path_json(traj: &Trajectory, dump: bool) -> Value {
    let mut v = json!({
        "elements": traj.total_element_count(),
        "ramp_elements": traj.ramp_elements,
        "pulse_start_element": traj.pulse_start_element,
        "pulse_stop_element": traj.pulse_stop_element,
        "total_time_s": traj.total_time,
        "first": traj.path.first(),
        "last": traj.path.last(),
    });
    if dump {
        v["path"] = json!(traj.path);
    }
    v
}

pub fn run_path(cfg: &Config, args: &PathArgs, json_mode: bool) -> Result<()> {
    let motion: MotionCfg = (&cfg.motion).into();
    let elements = args.elements.unwrap_or(motion.element_count);
    let accel = args.accel.unwrap_or(motion.acceleration_time_s);
    let max = cfg.limits.max_elements;
    for (what, n) in [("element count", Some(elements)), ("oscillation total", args.oscillate)] {
        if let Some(n) = n.filter(|n| *n > max) {
            return Err(TrajError::OutOfRange {
                what,
                value: n.to_string(),
                allowed: format!("<= {max} (limits.max_elements)"),
            }
            .into());
        }
    }
    let traj = match args.oscillate {
        Some(total) => {
            define_oscillation_path(args.start, args.end, args.duration, total, accel, elements)?
        }
        None => define_constant_velocity_path(args.start, args.end, args.duration, elements, accel)?,
    };
    tracing::info!(
        elements = traj.total_element_count(),
        ramp = traj.ramp_elements,
        oscillate = args.oscillate.is_some(),
        "path synthesized"
    );

    if json_mode {
        println!("{}", path_json(&traj, args.dump));
        return Ok(());
    }
    println!(
        "elements: {} (ramps of {}, {} at constant velocity)",
        traj.total_element_count(),
        traj.ramp_elements,
        traj.linear_elements()
    );
    println!(
        "pulse window: elements {}..={}",
        traj.pulse_start_element, traj.pulse_stop_element
    );
    println!("total time: {:.6} s", traj.total_time);
    if let (Some(first), Some(last)) = (traj.path.first(), traj.path.last()) {
        println!("positions: {first:.6} -> {last:.6}");
    }
    if args.dump {
        for (i, p) in traj.path.iter().enumerate() {
            println!("{:>6} {p:.6}", i + 1);
        }
    }
    Ok(())
}

pub struct ScanArgs {
    pub axis: String,
    pub start: f64,
    pub end: f64,
    pub time: f64,
    pub points: usize,
    pub lines: usize,
    pub no_readback: bool,
    pub output: Option<PathBuf>,
}

fn line_json(axis: &str, r: &LineReport) -> Value {
    json!({
        "line": r.line,
        "axis": axis,
        "points": r.positions.len(),
        "pulses": r.pulses,
        "build_skipped": r.build_skipped,
        "elapsed_ms": u64::try_from(r.elapsed.as_millis()).unwrap_or(u64::MAX),
        "max_deviation": r.max_deviation(),
        "positions": r.positions,
    })
}

fn scan_lines(
    station: &Station,
    axis: usize,
    motion: MotionCfg,
    timeouts: Timeouts,
    adapter_cfg: AdapterCfg,
    params: ContinuousParameters,
    lines: usize,
) -> Result<Vec<LineReport>> {
    let adapter = ContinuousAxisAdapter::new(
        station.controller.clone(),
        axis,
        motion,
        timeouts,
        adapter_cfg,
        station.cancel.clone(),
    )?;
    let reader = DeferredPositionReader::new(
        station.controller.clone(),
        axis,
        params.points,
        timeouts,
        station.cancel.clone(),
    );
    run_scan(&adapter, &reader, params, lines, &station.cancel)
}

pub fn run_scan_cmd(cfg: &Config, station: &Station, args: &ScanArgs, json_mode: bool) -> Result<()> {
    if args.lines == 0 {
        return Err(TrajError::Config("--lines must be >= 1".into()).into());
    }
    let axis = resolve_axis(cfg, station.controller.as_ref(), &args.axis)?;
    let axis_name = station.controller.axis_name(axis)?;
    let mut adapter_cfg: AdapterCfg = (&cfg.adapter).into();
    // Positions come from the readback; without it the reader reads once per line.
    adapter_cfg.read_back &= !args.no_readback;
    let params = ContinuousParameters {
        start: args.start,
        end: args.end,
        total_time: args.time,
        points: args.points,
    };
    tracing::info!(axis, name = %axis_name, lines = args.lines, points = args.points, "scan start");
    let reports = scan_lines(
        station,
        axis,
        (&cfg.motion).into(),
        (&cfg.timeouts).into(),
        adapter_cfg,
        params,
        args.lines,
    )?;

    for r in &reports {
        if json_mode {
            println!("{}", line_json(&axis_name, r));
        } else {
            println!(
                "line {}: {} positions on {axis_name}, {} pulses, max deviation {:.6}{}",
                r.line,
                r.positions.len(),
                r.pulses,
                r.max_deviation(),
                if r.build_skipped { " (build reused)" } else { "" }
            );
            let shown: Vec<String> = r.positions.iter().map(|p| format!("{p:.6}")).collect();
            println!("  {}", shown.join(" "));
        }
    }
    if let Some(path) = &args.output {
        let doc = json!({
            "axis": axis_name,
            "slot": axis,
            "start": args.start,
            "end": args.end,
            "time_s": args.time,
            "lines": reports.iter().map(|r| line_json(&axis_name, r)).collect::<Vec<_>>(),
        });
        write_json_atomic(path, &doc)
            .wrap_err_with(|| format!("write scan report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "scan report written");
    }
    Ok(())
}

/// One short line on slot 1 with a compact trajectory.
pub fn run_self_check(cfg: &Config, station: &Station, json_mode: bool) -> Result<()> {
    let motion = MotionCfg {
        acceleration_time_s: 0.05,
        element_count: 100.min(cfg.limits.max_elements),
    };
    let params = ContinuousParameters {
        start: 0.0,
        end: 1.0,
        total_time: 0.2,
        points: 5,
    };
    let adapter_cfg = AdapterCfg {
        two_d_mode: false,
        read_back: true,
    };
    let reports = scan_lines(station, 1, motion, (&cfg.timeouts).into(), adapter_cfg, params, 1)?;
    let positions = reports.first().map_or(0, |r| r.positions.len());
    if positions != params.points {
        eyre::bail!("self-check read back {positions} of {} positions", params.points);
    }
    let kind = match station.kind {
        DeviceKind::SimulatedChannels => "simulated-channels",
        DeviceKind::Simulated => "simulated",
    };
    if json_mode {
        println!(
            "{}",
            json!({ "self_check": "ok", "device": kind, "prefix": cfg.device.prefix, "positions": positions })
        );
    } else {
        println!("self-check ok: {kind} device {}, {positions} positions read back", cfg.device.prefix);
    }
    Ok(())
}

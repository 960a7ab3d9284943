#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod output;
mod scan;

use std::path::Path;

use clap::Parser;
use eyre::WrapErr;
use trajscan_config::Config;
use trajscan_core::error::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::scan::{PathArgs, ScanArgs, open_station, run_path, run_scan_cmd, run_self_check};

fn load_config(path: Option<&Path>) -> Result<Config> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("read config {}", p.display()))?;
            trajscan_config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {}", p.display()))?
        }
        None => Config::default(),
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console layer per --log-level / RUST_LOG, plus an optional JSON-lines file.
fn setup_tracing(cli: &Cli, cfg: &Config) {
    // [logging] level applies unless --log-level moves off the default.
    let level = cfg
        .logging
        .level
        .as_deref()
        .filter(|_| cli.log_level == "info")
        .unwrap_or(&cli.log_level);
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file_layer = cfg.logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name().map_or_else(|| "trajscan.log".into(), |n| n.to_os_string());
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new(level))
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
}

fn run(cli: Cli, cfg: &Config) -> Result<()> {
    let json_mode = cli.json;
    match cli.cmd {
        Commands::Path {
            start,
            end,
            duration,
            elements,
            accel,
            oscillate,
            dump,
        } => run_path(
            cfg,
            &PathArgs {
                start,
                end,
                duration,
                elements,
                accel,
                oscillate,
                dump,
            },
            json_mode,
        ),
        Commands::Scan {
            axis,
            start,
            end,
            time,
            points,
            lines,
            no_readback,
            output,
        } => {
            let station = open_station(cfg)?;
            install_interrupt(&station);
            run_scan_cmd(
                cfg,
                &station,
                &ScanArgs {
                    axis,
                    start,
                    end,
                    time,
                    points,
                    lines,
                    no_readback,
                    output,
                },
                json_mode,
            )
        }
        Commands::SelfCheck => {
            let station = open_station(cfg)?;
            install_interrupt(&station);
            run_self_check(cfg, &station, json_mode)
        }
    }
}

/// Ctrl-C cancels waits and aborts the running move.
fn install_interrupt(station: &scan::Station) {
    let cancel = station.cancel.clone();
    let controller = station.controller.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::warn!("interrupt received; stopping trajectory");
        cancel.cancel();
        if let Err(e) = controller.stop() {
            tracing::error!(error = %e, "stop after interrupt failed");
        }
    }) {
        tracing::warn!(error = %e, "Ctrl-C handler not installed");
    }
}

fn report(err: &eyre::Report) -> i32 {
    tracing::error!(error = %err, "command failed");
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    exit_code_for_error(err)
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => std::process::exit(report(&e)),
    };
    setup_tracing(&cli, &cfg);

    if let Err(e) = run(cli, &cfg) {
        std::process::exit(report(&e));
    }
}

//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "trajscan", version, about = "Trajectory fly-scan CLI")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synthesize a constant-velocity trajectory and print its summary
    Path {
        /// Position at the start of the constant-velocity section
        #[arg(long, allow_negative_numbers = true)]
        start: f64,
        /// Position at the end of the constant-velocity section
        #[arg(long, allow_negative_numbers = true)]
        end: f64,
        /// Seconds spent at constant velocity
        #[arg(long)]
        duration: f64,
        /// Trajectory elements (default: motion.element_count)
        #[arg(long, value_name = "N")]
        elements: Option<usize>,
        /// Ramp time in seconds (default: motion.acceleration_time_s)
        #[arg(long, value_name = "SECONDS")]
        accel: Option<f64>,
        /// Repeat the path back and forth up to this many elements
        #[arg(
            long,
            value_name = "N",
            long_help = "Build an oscillation path instead: the constant-velocity segment is repeated forwards and backwards, sharing turnaround samples, and truncated to N elements. N must leave room for both ramps plus three linear elements."
        )]
        oscillate: Option<usize>,
        /// Include every path element in the output
        #[arg(long, action = ArgAction::SetTrue)]
        dump: bool,
    },
    /// Run a fly scan against the configured simulated device
    Scan {
        /// Axis name from [axes] names, a device axis name, or a 1-based slot
        #[arg(long)]
        axis: String,
        #[arg(long, allow_negative_numbers = true)]
        start: f64,
        #[arg(long, allow_negative_numbers = true)]
        end: f64,
        /// Seconds at constant velocity per line
        #[arg(long)]
        time: f64,
        /// Detector frames per line
        #[arg(long)]
        points: usize,
        /// Number of identical lines
        #[arg(long, default_value_t = 1)]
        lines: usize,
        /// Skip reading achieved positions back after each move
        #[arg(long = "no-readback", action = ArgAction::SetTrue)]
        no_readback: bool,
        /// Write the full scan report as JSON to FILE
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Build the configured device and run one short line
    SelfCheck,
}

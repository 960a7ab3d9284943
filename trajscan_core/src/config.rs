//! Runtime configuration for the trajectory engine.
//!
//! These are the structs the controller, adapter and reader consume.
//! They are separate from the TOML-deserialized config in `trajscan_config`.

use std::time::Duration;

use crate::status::Phase;

/// Device capacity limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerLimits {
    /// Maximum trajectory elements the device accepts. Default: 1500.
    pub max_elements: usize,
    /// Maximum output pulses per trajectory. Default: 60000.
    pub max_pulses: usize,
}

impl Default for ControllerLimits {
    fn default() -> Self {
        Self {
            max_elements: 1500,
            max_pulses: 60_000,
        }
    }
}

/// Path synthesis settings used by the continuous-axis adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCfg {
    /// Ramp time at each end of a constant-velocity move (s).
    pub acceleration_time_s: f64,
    /// Elements per synthesized trajectory.
    pub element_count: usize,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            acceleration_time_s: 1.0,
            element_count: 1500,
        }
    }
}

/// Bounds on every blocking wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub build_ms: u64,
    pub execute_ms: u64,
    pub read_ms: u64,
    /// Max wait for a deferred position's row.
    pub readback_ms: u64,
    /// Upper bound on a single wait slice; cancellation is checked between slices.
    pub poll_ms: u64,
    /// Max wait for a plain put-with-callback (e.g. the trajectory time).
    pub put_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build_ms: 10_000,
            execute_ms: 120_000,
            read_ms: 60_000,
            readback_ms: 60_000,
            poll_ms: 50,
            put_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        Duration::from_millis(match phase {
            Phase::Build => self.build_ms,
            Phase::Execute => self.execute_ms,
            Phase::Read => self.read_ms,
        })
    }

    pub fn readback(&self) -> Duration {
        Duration::from_millis(self.readback_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn put(&self) -> Duration {
        Duration::from_millis(self.put_ms)
    }
}

/// Continuous-axis adapter behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCfg {
    /// Skip re-building an unchanged trajectory between scan lines.
    pub two_d_mode: bool,
    /// Read achieved positions after every move.
    pub read_back: bool,
}

impl Default for AdapterCfg {
    fn default() -> Self {
        Self {
            two_d_mode: false,
            read_back: true,
        }
    }
}

/// Pacing of the channel-free simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationCfg {
    pub build_latency_ms: u64,
    pub read_latency_ms: u64,
    /// Motion runs `speed_factor` times faster than the trajectory time.
    pub speed_factor: f64,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            build_latency_ms: 20,
            read_latency_ms: 20,
            speed_factor: 1.0,
        }
    }
}

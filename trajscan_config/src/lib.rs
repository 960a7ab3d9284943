#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the trajectory scan engine.
//!
//! `Config` and its sections are deserialized from TOML and checked with
//! [`Config::validate`]. Every section except `[device]` may be omitted.
use serde::Deserialize;

pub use trajscan_traits::AXIS_SLOTS;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Channel-backed controller talking to the in-process simulated device.
    #[default]
    SimulatedChannels,
    /// Channel-free simulated controller.
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Device {
    /// Channel name prefix, e.g. "BL11I-MO-DIFF-01:TRAJ1:".
    pub prefix: String,
    #[serde(default)]
    pub kind: DeviceKind,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            prefix: "SIM:TRAJ1:".to_string(),
            kind: DeviceKind::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    pub max_elements: usize,
    pub max_pulses: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_elements: 1500,
            max_pulses: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Motion {
    /// Ramp time at each end of a constant-velocity move (s).
    pub acceleration_time_s: f64,
    /// Elements per synthesized trajectory.
    pub element_count: usize,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            acceleration_time_s: 1.0,
            element_count: 1500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Axes {
    /// Axis names for slots 1..=8, in slot order.
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Timeouts {
    pub build_ms: u64,
    pub execute_ms: u64,
    pub read_ms: u64,
    pub readback_ms: u64,
    pub poll_ms: u64,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Adapter {
    /// Reuse an unchanged build between lines of a 2-D scan.
    pub two_d_mode: bool,
    /// Read back achieved positions after each move.
    pub read_back: bool,
}

impl Default for Adapter {
    fn default() -> Self {
        Self {
            two_d_mode: false,
            read_back: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Simulation {
    pub build_latency_ms: u64,
    pub read_latency_ms: u64,
    /// Simulated motion runs this many times faster than real time.
    pub speed_factor: f64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            build_latency_ms: 20,
            read_latency_ms: 20,
            speed_factor: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub motion: Motion,
    #[serde(default)]
    pub axes: Axes,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub adapter: Adapter,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub simulation: Simulation,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// 1-based slot of the axis called `name`.
    pub fn axis_slot(&self, name: &str) -> Option<usize> {
        self.axes
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| i + 1)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.prefix.trim().is_empty() {
            eyre::bail!("device.prefix must not be empty");
        }
        if self.device.prefix.chars().any(char::is_whitespace) {
            eyre::bail!("device.prefix must not contain whitespace");
        }

        // Limits
        if self.limits.max_elements < 3 {
            eyre::bail!("limits.max_elements must be >= 3");
        }
        if self.limits.max_pulses == 0 {
            eyre::bail!("limits.max_pulses must be >= 1");
        }

        // Motion
        if !(self.motion.acceleration_time_s.is_finite() && self.motion.acceleration_time_s >= 0.0)
        {
            eyre::bail!("motion.acceleration_time_s must be finite and >= 0");
        }
        if self.motion.element_count < 3 {
            eyre::bail!("motion.element_count must be >= 3");
        }
        if self.motion.element_count > self.limits.max_elements {
            eyre::bail!(
                "motion.element_count ({}) exceeds limits.max_elements ({})",
                self.motion.element_count,
                self.limits.max_elements
            );
        }

        // Axes
        if self.axes.names.len() > AXIS_SLOTS {
            eyre::bail!(
                "axes.names lists {} axes; the device has {AXIS_SLOTS} slots",
                self.axes.names.len()
            );
        }
        for (i, name) in self.axes.names.iter().enumerate() {
            if name.trim().is_empty() {
                eyre::bail!("axes.names[{i}] must not be empty");
            }
            if self.axes.names[..i].contains(name) {
                eyre::bail!("axes.names has duplicate axis '{name}'");
            }
        }

        // Timeouts
        let t = &self.timeouts;
        for (key, v) in [
            ("build_ms", t.build_ms),
            ("execute_ms", t.execute_ms),
            ("read_ms", t.read_ms),
            ("readback_ms", t.readback_ms),
            ("poll_ms", t.poll_ms),
            ("put_ms", t.put_ms),
        ] {
            if v == 0 {
                eyre::bail!("timeouts.{key} must be >= 1");
            }
        }
        if t.poll_ms > t.build_ms.min(t.execute_ms).min(t.read_ms) {
            eyre::bail!("timeouts.poll_ms must not exceed the phase timeouts");
        }

        // Logging
        if let Some(rotation) = self.logging.rotation.as_deref()
            && !matches!(rotation, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly (got '{rotation}')");
        }

        // Simulation
        if !(self.simulation.speed_factor.is_finite() && self.simulation.speed_factor > 0.0) {
            eyre::bail!("simulation.speed_factor must be finite and > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").unwrap();
        assert_eq!(cfg.device.prefix, "SIM:TRAJ1:");
        assert_eq!(cfg.device.kind, DeviceKind::SimulatedChannels);
        assert_eq!(cfg.limits.max_elements, 1500);
        assert_eq!(cfg.timeouts.execute_ms, 120_000);
        assert!(cfg.adapter.read_back);
        cfg.validate().unwrap();
    }

    #[test]
    fn axis_slots_are_one_based() {
        let cfg = load_toml("[axes]\nnames = [\"x\", \"theta\"]\n").unwrap();
        assert_eq!(cfg.axis_slot("theta"), Some(2));
        assert_eq!(cfg.axis_slot("phi"), None);
    }

    #[test]
    fn device_kind_is_kebab_case() {
        let cfg = load_toml("[device]\nprefix = \"P:\"\nkind = \"simulated\"\n").unwrap();
        assert_eq!(cfg.device.kind, DeviceKind::Simulated);
        assert!(load_toml("[device]\nprefix = \"P:\"\nkind = \"epics\"\n").is_err());
    }
}

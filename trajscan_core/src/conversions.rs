//! `From` implementations bridging `trajscan_config` types to `trajscan_core` types.

use crate::config::{AdapterCfg, ControllerLimits, MotionCfg, SimulationCfg, Timeouts};

// ── ControllerLimits ─────────────────────────────────────────────────────────

impl From<&trajscan_config::Limits> for ControllerLimits {
    fn from(c: &trajscan_config::Limits) -> Self {
        Self {
            max_elements: c.max_elements,
            max_pulses: c.max_pulses,
        }
    }
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<&trajscan_config::Motion> for MotionCfg {
    fn from(c: &trajscan_config::Motion) -> Self {
        Self {
            acceleration_time_s: c.acceleration_time_s,
            element_count: c.element_count,
        }
    }
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

impl From<&trajscan_config::Timeouts> for Timeouts {
    fn from(c: &trajscan_config::Timeouts) -> Self {
        Self {
            build_ms: c.build_ms,
            execute_ms: c.execute_ms,
            read_ms: c.read_ms,
            readback_ms: c.readback_ms,
            poll_ms: c.poll_ms,
            put_ms: c.put_ms,
        }
    }
}

// ── AdapterCfg ───────────────────────────────────────────────────────────────

impl From<&trajscan_config::Adapter> for AdapterCfg {
    fn from(c: &trajscan_config::Adapter) -> Self {
        Self {
            two_d_mode: c.two_d_mode,
            read_back: c.read_back,
        }
    }
}

// ── SimulationCfg ────────────────────────────────────────────────────────────

impl From<&trajscan_config::Simulation> for SimulationCfg {
    fn from(c: &trajscan_config::Simulation) -> Self {
        Self {
            build_latency_ms: c.build_latency_ms,
            read_latency_ms: c.read_latency_ms,
            speed_factor: c.speed_factor,
        }
    }
}

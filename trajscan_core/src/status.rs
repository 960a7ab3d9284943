//! Phase identity, outcome and bookkeeping.

use std::fmt;

/// One of the three device-side phases of a trajectory scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Build,
    Execute,
    Read,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Build, Phase::Execute, Phase::Read];

    pub(crate) fn index(self) -> usize {
        match self {
            Phase::Build => 0,
            Phase::Execute => 1,
            Phase::Read => 2,
        }
    }

    /// Label the device reports for a raw state value of this phase.
    pub fn device_state_label(self, raw: i32) -> &'static str {
        match (self, raw) {
            (_, 0) => "Done",
            (Phase::Execute, 1) => "Move start",
            (Phase::Execute, 2) => "Executing",
            (Phase::Execute, 3) => "Flyback",
            (_, 1) => "Busy",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Build => "build",
            Phase::Execute => "execute",
            Phase::Read => "read",
        })
    }
}

/// Outcome of the most recent invocation of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseStatus {
    #[default]
    Undefined,
    Success,
    Failure,
    /// Execute only.
    Abort,
    /// Execute only.
    Timeout,
}

impl PhaseStatus {
    /// Decode a raw status code. Abort and Timeout only exist for Execute;
    /// any code a phase does not define decodes as Failure.
    pub fn from_raw(phase: Phase, raw: i32) -> Self {
        match (phase, raw) {
            (_, 0) => PhaseStatus::Undefined,
            (_, 1) => PhaseStatus::Success,
            (Phase::Execute, 3) => PhaseStatus::Abort,
            (Phase::Execute, 4) => PhaseStatus::Timeout,
            _ => PhaseStatus::Failure,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            PhaseStatus::Undefined => 0,
            PhaseStatus::Success => 1,
            PhaseStatus::Failure => 2,
            PhaseStatus::Abort => 3,
            PhaseStatus::Timeout => 4,
        }
    }

    pub fn is_success(self) -> bool {
        self == PhaseStatus::Success
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseStatus::Undefined => "undefined",
            PhaseStatus::Success => "success",
            PhaseStatus::Failure => "failure",
            PhaseStatus::Abort => "abort",
            PhaseStatus::Timeout => "timeout",
        })
    }
}

/// Controller-side tracking of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseState {
    /// Never invoked.
    #[default]
    Idle,
    /// Invoked; completion not yet observed.
    Busy,
    /// Completion observed.
    Done,
}

/// Point-in-time view of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhaseSnapshot {
    pub state: PhaseState,
    pub status: PhaseStatus,
    /// State label last reported by the device.
    pub device_state: String,
    /// Message last reported by the device.
    pub message: String,
    /// Number of completions observed.
    pub completions: u64,
}

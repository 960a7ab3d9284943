use thiserror::Error;

use crate::status::{Phase, PhaseStatus};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrajError {
    #[error("axis index {index} out of range 1..={max}")]
    AxisRange { index: usize, max: usize },
    #[error("{what} = {value} out of range ({allowed})")]
    OutOfRange {
        what: &'static str,
        value: String,
        allowed: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{phase} device error: {message}")]
    Device { phase: Phase, message: String },
    #[error("{phase} finished with status {status}: {message}")]
    PhaseFailed {
        phase: Phase,
        status: PhaseStatus,
        message: String,
    },
    #[error("{phase} did not complete within {waited_ms} ms")]
    PhaseTimeout { phase: Phase, waited_ms: u64 },
    #[error("path of {generated} elements cannot hold {wanted} elements with a pulse window")]
    PathTooShort { wanted: usize, generated: usize },
    #[error("invalid path range: {0}")]
    InvalidRange(String),
    #[error("position {index} (row {row}) not read back within {waited_ms} ms")]
    ReadbackTimeout {
        index: usize,
        row: usize,
        waited_ms: u64,
    },
    #[error("{requested} requested while {busy} is still in flight")]
    PhaseInFlight { requested: Phase, busy: Phase },
    #[error("row {row} holds {len} samples, no sample at offset {offset}")]
    SampleMissing {
        row: usize,
        offset: usize,
        len: usize,
    },
    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification used by front ends to pick advice and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Device,
    PhaseFailed,
    Timeout,
    Path,
    Readback,
    Busy,
    Cancelled,
}

impl TrajError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrajError::AxisRange { .. } | TrajError::OutOfRange { .. } | TrajError::Config(_) => {
                ErrorKind::Configuration
            }
            TrajError::Device { .. } => ErrorKind::Device,
            TrajError::PhaseFailed { .. } => ErrorKind::PhaseFailed,
            TrajError::PhaseTimeout { .. } | TrajError::ReadbackTimeout { .. } => {
                ErrorKind::Timeout
            }
            TrajError::PathTooShort { .. } | TrajError::InvalidRange(_) => ErrorKind::Path,
            TrajError::SampleMissing { .. } => ErrorKind::Readback,
            TrajError::PhaseInFlight { .. } => ErrorKind::Busy,
            TrajError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn out_of_range(
        what: &'static str,
        value: impl ToString,
        allowed: impl Into<String>,
    ) -> Self {
        TrajError::OutOfRange {
            what,
            value: value.to_string(),
            allowed: allowed.into(),
        }
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

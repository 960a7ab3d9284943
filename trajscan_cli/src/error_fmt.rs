//! Human-readable error descriptions and structured JSON error formatting.

use trajscan_core::{ErrorKind, Phase, PhaseStatus, TrajError};
use trajscan_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(te) = err.downcast_ref::<TrajError>() {
        return match te {
            TrajError::AxisRange { index, max } => format!(
                "What happened: Axis {index} does not exist.\nLikely causes: The slot number is outside 1..={max}.\nHow to fix: Pass an axis name from [axes] names or a slot between 1 and {max}."
            ),
            TrajError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A missing or mistyped option or config value.\nHow to fix: Check the command line and the TOML config, then rerun."
            ),
            TrajError::OutOfRange { what, value, allowed } => format!(
                "What happened: {what} = {value} is outside the allowed range ({allowed}).\nLikely causes: The scan asks for more than the controller supports.\nHow to fix: Reduce the value or raise the matching [limits] entry if the device allows it."
            ),
            TrajError::InvalidRange(detail) => format!(
                "What happened: The trajectory could not be synthesized ({detail}).\nLikely causes: Too few elements for the acceleration ramps, or a non-positive duration.\nHow to fix: Raise motion.element_count, shorten motion.acceleration_time_s, or lengthen the scan time."
            ),
            TrajError::PathTooShort { wanted, generated } => format!(
                "What happened: The oscillation path holds {generated} elements but needs at least {wanted}.\nLikely causes: The total leaves no room for both ramps and a constant-velocity section.\nHow to fix: Raise the requested total or the segment element count."
            ),
            TrajError::PhaseFailed { phase: Phase::Execute, status: PhaseStatus::Abort, .. } => {
                "What happened: The trajectory move was aborted.\nLikely causes: Ctrl-C, an explicit stop, or an abort raised at the device.\nHow to fix: Start a new scan; the next line rebuilds the trajectory.".to_string()
            }
            TrajError::PhaseFailed { phase, status, message } => format!(
                "What happened: The {phase} phase finished with status {status} ({message}).\nLikely causes: The device rejected the trajectory or lost a motor during the move.\nHow to fix: Check the device message above, correct the scan range or motor state, then rerun."
            ),
            TrajError::PhaseTimeout { phase, waited_ms } => format!(
                "What happened: The {phase} phase did not complete within {waited_ms} ms.\nLikely causes: The device is not acknowledging the trigger, or the timeout is too low for the move.\nHow to fix: Check the device is running and raise timeouts.{phase}_ms in the config if the move is long."
            ),
            TrajError::ReadbackTimeout { index, row, waited_ms } => format!(
                "What happened: Position {index} (line {row}) was not read back within {waited_ms} ms.\nLikely causes: A scan line did not finish, or its readback failed.\nHow to fix: Check earlier errors for the failed line and raise timeouts.readback_ms if lines are long."
            ),
            TrajError::SampleMissing { row, offset, len } => format!(
                "What happened: Line {row} holds {len} positions but position {offset} was requested.\nLikely causes: Fewer pulses were captured than detector frames expected.\nHow to fix: Check the pulse count matches the number of points and that the move was not cut short."
            ),
            TrajError::PhaseInFlight { requested, busy } => format!(
                "What happened: {requested} was requested while {busy} was still running.\nLikely causes: An earlier phase has not finished or was left hanging.\nHow to fix: Wait for the running phase or stop the device, then retry."
            ),
            TrajError::Device { phase, message } => format!(
                "What happened: Device communication failed during {phase} ({message}).\nLikely causes: A disconnected or misnamed channel.\nHow to fix: Verify device.prefix and that the device is reachable."
            ),
            TrajError::Cancelled => "What happened: The operation was cancelled.\nLikely causes: Ctrl-C was pressed.\nHow to fix: Rerun the command when ready.".to_string(),
        };
    }

    if let Some(he) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: Simulated device error ({he}).\nLikely causes: A channel was declared with a different type or is disconnected.\nHow to fix: Re-run with --log-level=debug for the channel name."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("parse config") || lower.contains("read config") || lower.contains("invalid configuration") {
        let mut cause = String::new();
        if let Some(src) = err.source() {
            cause = format!(" ({src})");
        }
        return format!(
            "What happened: Configuration is invalid or unreadable{cause}.\nLikely causes: A TOML syntax error, an unknown value, or an out-of-range setting.\nHow to fix: Edit the TOML config and try again. Original: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Configuration => "Configuration",
        ErrorKind::Device => "Device",
        ErrorKind::PhaseFailed => "PhaseFailed",
        ErrorKind::Timeout => "Timeout",
        ErrorKind::Path => "Path",
        ErrorKind::Readback => "Readback",
        ErrorKind::Busy => "Busy",
        ErrorKind::Cancelled => "Cancelled",
    }
}

/// Stable exit codes per error kind; untyped errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<TrajError>().map(TrajError::kind) {
        Some(ErrorKind::Configuration | ErrorKind::Path) => 2,
        Some(ErrorKind::Device) => 3,
        Some(ErrorKind::PhaseFailed) => 4,
        Some(ErrorKind::Timeout) => 5,
        Some(ErrorKind::Readback) => 6,
        Some(ErrorKind::Busy) => 7,
        Some(ErrorKind::Cancelled) => 130,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    if let Some(te) = err.downcast_ref::<TrajError>() {
        let details = match te {
            TrajError::PhaseFailed { phase, status, message } => {
                Some(json!({ "phase": phase.to_string(), "status": status.to_string(), "device_message": message }))
            }
            TrajError::PhaseTimeout { phase, waited_ms } => {
                Some(json!({ "phase": phase.to_string(), "waited_ms": waited_ms }))
            }
            TrajError::ReadbackTimeout { index, row, waited_ms } => {
                Some(json!({ "index": index, "row": row, "waited_ms": waited_ms }))
            }
            _ => None,
        };
        let reason = kind_name(te.kind());
        let obj = match details {
            Some(d) => json!({ "reason": reason, "details": d, "message": msg }),
            None => json!({ "reason": reason, "message": msg }),
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": msg }).to_string()
}

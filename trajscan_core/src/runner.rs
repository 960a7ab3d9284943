//! End-to-end constant-velocity fly scans.

use std::time::{Duration, Instant};

use crate::adapter::{ContinuousAxisAdapter, ContinuousParameters};
use crate::controller::TrajectoryController;
use crate::deferred::{DeferredPosition, DeferredPositionReader};
use crate::error::{Result, TrajError};
use crate::status::{Phase, PhaseState};
use crate::util::CancelToken;

/// Outcome of one scan line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineReport {
    pub line: usize,
    /// Achieved position at every detector frame.
    pub positions: Vec<f64>,
    /// Nominal position of every detector frame.
    pub requested: Vec<f64>,
    pub pulses: usize,
    pub build_skipped: bool,
    pub elapsed: Duration,
}

impl LineReport {
    /// Largest |achieved - nominal| over the line.
    pub fn max_deviation(&self) -> f64 {
        self.positions
            .iter()
            .zip(&self.requested)
            .map(|(a, r)| (a - r).abs())
            .fold(0.0, f64::max)
    }
}

/// Stop an execute left running by an earlier, interrupted line.
fn settle_previous_move<C: TrajectoryController + ?Sized>(
    adapter: &ContinuousAxisAdapter<C>,
    cancel: &CancelToken,
) -> Result<()> {
    let c = adapter.controller();
    if c.phase(Phase::Execute).state != PhaseState::Busy {
        return Ok(());
    }
    tracing::warn!("execute still running from a previous line; stopping it");
    adapter.stop()?;
    c.wait_for(
        Phase::Execute,
        adapter.timeouts().for_phase(Phase::Execute),
        cancel,
    )?;
    Ok(())
}

/// Run one line: prepare, move, wait, buffer the row and resolve positions.
pub fn run_line<C: TrajectoryController + ?Sized>(
    adapter: &ContinuousAxisAdapter<C>,
    reader: &DeferredPositionReader<C>,
    line: usize,
    cancel: &CancelToken,
) -> Result<LineReport> {
    if cancel.is_cancelled() {
        return Err(TrajError::Cancelled.into());
    }
    let started = Instant::now();
    settle_previous_move(adapter, cancel)?;

    let points = adapter.number_of_data_points();
    let build_skipped = adapter.build_is_cached();
    adapter.prepare_for_continuous_move()?;

    // Positions are requested before they exist and resolved after read-back.
    let pending: Vec<DeferredPosition> = (0..points).map(|_| reader.next_position()).collect();
    let requested = (0..points)
        .map(|f| adapter.calculate_energy_or_position(f))
        .collect::<Result<Vec<f64>>>()?;

    tracing::info!(line, points, build_skipped, "scan line started");
    adapter.perform_continuous_move()?;
    if let Err(e) = adapter.continuous_move_complete() {
        if matches!(
            e.downcast_ref::<TrajError>(),
            Some(TrajError::Cancelled | TrajError::PhaseTimeout { .. })
        ) {
            if let Err(stop_err) = adapter.stop() {
                tracing::error!(error = %stop_err, "stop after interrupted move failed");
            }
        }
        return Err(e);
    }
    reader.at_scan_line_end()?;
    adapter.at_scan_line_end();

    let positions = pending
        .iter()
        .map(DeferredPosition::resolve)
        .collect::<Result<Vec<f64>>>()?;
    let report = LineReport {
        line,
        positions,
        requested,
        pulses: adapter.controller().actual_pulse_count(),
        build_skipped,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        line,
        pulses = report.pulses,
        max_deviation = report.max_deviation(),
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "scan line complete"
    );
    Ok(report)
}

/// Run `lines` identical lines. The build cache is dropped at scan end,
/// also when a line fails.
pub fn run_scan<C: TrajectoryController + ?Sized>(
    adapter: &ContinuousAxisAdapter<C>,
    reader: &DeferredPositionReader<C>,
    params: ContinuousParameters,
    lines: usize,
    cancel: &CancelToken,
) -> Result<Vec<LineReport>> {
    adapter.set_continuous_parameters(params);
    reader.reset(params.points);
    let mut reports = Vec::with_capacity(lines);
    let outcome = (0..lines).try_for_each(|line| {
        reports.push(run_line(adapter, reader, line, cancel)?);
        Ok::<(), eyre::Report>(())
    });
    adapter.at_scan_end();
    outcome.map(|()| reports)
}

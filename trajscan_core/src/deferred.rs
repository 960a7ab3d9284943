//! Positions that callers may request before they are known.
//!
//! Each scan line appends one row of read-back positions. A
//! [`DeferredPosition`] is bound to a linear sample index and resolves to
//! `rows[index / points_per_row][index % points_per_row]` once that row
//! exists. Resolutions on one reader are serialized.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::Timeouts;
use crate::controller::TrajectoryController;
use crate::error::{Result, TrajError};
use crate::status::Phase;
use crate::util::{CancelToken, duration_ms, wait_slice};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RowBuffer {
    rows: Mutex<Vec<Vec<f64>>>,
    cv: Condvar,
    /// Held for the duration of one resolution.
    turn: Mutex<()>,
}

impl RowBuffer {
    fn push(&self, row: Vec<f64>) -> usize {
        let n = {
            let mut rows = lock(&self.rows);
            rows.push(row);
            rows.len()
        };
        self.cv.notify_all();
        n
    }
}

/// Handle to a position that becomes available when its row is read back.
pub struct DeferredPosition {
    index: usize,
    row: usize,
    offset: usize,
    buffer: Arc<RowBuffer>,
    timeout: Duration,
    poll: Duration,
    cancel: CancelToken,
}

impl DeferredPosition {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Block until the owning row is buffered, bounded by the readback timeout.
    pub fn resolve(&self) -> Result<f64> {
        let _turn = lock(&self.buffer.turn);
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut rows = lock(&self.buffer.rows);
        loop {
            if let Some(r) = rows.get(self.row) {
                return r.get(self.offset).copied().ok_or_else(|| {
                    TrajError::SampleMissing {
                        row: self.row,
                        offset: self.offset,
                        len: r.len(),
                    }
                    .into()
                });
            }
            if self.cancel.is_cancelled() {
                return Err(TrajError::Cancelled.into());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TrajError::ReadbackTimeout {
                    index: self.index,
                    row: self.row,
                    waited_ms: duration_ms(now - started),
                }
                .into());
            }
            rows = match self
                .buffer
                .cv
                .wait_timeout(rows, wait_slice(deadline - now, self.poll))
            {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

pub struct DeferredPositionReader<C: ?Sized> {
    controller: Arc<C>,
    axis: usize,
    points_per_row: AtomicUsize,
    timeouts: Timeouts,
    cancel: CancelToken,
    buffer: Arc<RowBuffer>,
    next_index: AtomicUsize,
    /// Read completions already consumed as rows.
    reads_taken: Mutex<u64>,
}

impl<C: TrajectoryController + ?Sized> DeferredPositionReader<C> {
    pub fn new(
        controller: Arc<C>,
        axis: usize,
        points_per_row: usize,
        timeouts: Timeouts,
        cancel: CancelToken,
    ) -> Self {
        let reads_taken = controller.phase(Phase::Read).completions;
        Self {
            controller,
            axis,
            points_per_row: AtomicUsize::new(points_per_row.max(1)),
            timeouts,
            cancel,
            buffer: Arc::new(RowBuffer::default()),
            next_index: AtomicUsize::new(0),
            reads_taken: Mutex::new(reads_taken),
        }
    }

    /// Clear buffered rows and restart indexing; called at scan start.
    pub fn reset(&self, points_per_row: usize) {
        lock(&self.buffer.rows).clear();
        self.points_per_row
            .store(points_per_row.max(1), Ordering::SeqCst);
        self.next_index.store(0, Ordering::SeqCst);
        *lock(&self.reads_taken) = self.controller.phase(Phase::Read).completions;
        tracing::debug!(axis = self.axis, points_per_row, "readback reset");
    }

    pub fn rows_buffered(&self) -> usize {
        lock(&self.buffer.rows).len()
    }

    pub fn points_per_row(&self) -> usize {
        self.points_per_row.load(Ordering::SeqCst)
    }

    pub fn next_position(&self) -> DeferredPosition {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let ppr = self.points_per_row();
        DeferredPosition {
            index,
            row: index / ppr,
            offset: index % ppr,
            buffer: self.buffer.clone(),
            timeout: self.timeouts.readback(),
            poll: self.timeouts.poll(),
            cancel: self.cancel.clone(),
        }
    }

    /// Append the positions of the line just finished as the next row,
    /// triggering a Read unless one completed since the last row.
    pub fn at_scan_line_end(&self) -> Result<()> {
        let mut taken = lock(&self.reads_taken);
        let mut snap = self.controller.phase(Phase::Read);
        if snap.completions == *taken {
            self.controller.read()?;
            snap = self.controller.wait_for(
                Phase::Read,
                self.timeouts.for_phase(Phase::Read),
                &self.cancel,
            )?;
        }
        if !snap.status.is_success() {
            return Err(TrajError::PhaseFailed {
                phase: Phase::Read,
                status: snap.status,
                message: snap.message,
            }
            .into());
        }
        let positions = self.controller.actual_positions(self.axis)?;
        *taken = snap.completions;
        let count = positions.len();
        let rows = self.buffer.push(positions);
        tracing::debug!(axis = self.axis, row = rows - 1, samples = count, "row buffered");
        Ok(())
    }
}

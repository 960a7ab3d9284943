//! Trajectory synthesis.
//!
//! A constant-velocity path is an ease-in ramp of `s` elements, `n` linear
//! elements and a mirrored ease-out ramp of `s` elements, with
//! `s = round(a·N / (2a + d))` for acceleration time `a`, constant-velocity
//! duration `d` and `N` total elements. Position and velocity are continuous
//! at both joints and the path starts exactly at `start` and ends exactly at
//! `end`. Pulses fire over the linear section only.

use crate::error::TrajError;

pub use trajscan_hardware::sample_at_pulses;

/// Smallest constant-velocity section a path may have.
pub const MIN_LINEAR_ELEMENTS: usize = 3;

/// A computed trajectory. Never mutated after synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub path: Vec<f64>,
    /// 1-based element where pulsing starts.
    pub pulse_start_element: usize,
    /// 1-based element where pulsing stops.
    pub pulse_stop_element: usize,
    /// Seconds from the first to the last element.
    pub total_time: f64,
    /// Elements in each acceleration ramp.
    pub ramp_elements: usize,
}

impl Trajectory {
    pub fn total_element_count(&self) -> usize {
        self.path.len()
    }

    /// Elements in the constant-velocity section.
    pub fn linear_elements(&self) -> usize {
        self.path.len() - 2 * self.ramp_elements
    }
}

fn check_finite(what: &str, v: f64) -> Result<(), TrajError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(TrajError::InvalidRange(format!("{what} must be finite, got {v}")))
    }
}

/// Per-end ramp element count for `total` elements. `span` is `2a + d`.
fn ramp_elements(span: f64, total: usize, acceleration_time_s: f64) -> usize {
    // a / span stays below 1/2, so the product cannot overflow.
    (total as f64 * (acceleration_time_s / span)).round() as usize
}

pub fn define_constant_velocity_path(
    start: f64,
    end: f64,
    duration_s: f64,
    total_element_count: usize,
    acceleration_time_s: f64,
) -> Result<Trajectory, TrajError> {
    check_finite("start", start)?;
    check_finite("end", end)?;
    check_finite("duration", duration_s)?;
    check_finite("acceleration time", acceleration_time_s)?;
    if duration_s <= 0.0 {
        return Err(TrajError::InvalidRange(format!(
            "duration must be > 0, got {duration_s}"
        )));
    }
    if acceleration_time_s < 0.0 {
        return Err(TrajError::InvalidRange(format!(
            "acceleration time must be >= 0, got {acceleration_time_s}"
        )));
    }

    let span = 2.0 * acceleration_time_s + duration_s;
    if !span.is_finite() {
        return Err(TrajError::InvalidRange(format!(
            "total time {duration_s} + 2 x {acceleration_time_s} s overflows"
        )));
    }

    let total = total_element_count;
    let s = ramp_elements(span, total, acceleration_time_s);
    let n = total.checked_sub(2 * s).unwrap_or(0);
    if n < MIN_LINEAR_ELEMENTS {
        return Err(TrajError::InvalidRange(format!(
            "{total} elements leave {n} constant-velocity elements after two ramps of {s}; need at least {MIN_LINEAR_ELEMENTS}"
        )));
    }

    let d = end - start;
    let m = (total - 1 - s) as f64;
    let mut path = vec![0.0; total];
    for (x, p) in path.iter_mut().enumerate().take(s + n) {
        let xf = x as f64;
        *p = if x < s {
            start + d * xf * xf / (2.0 * s as f64 * m)
        } else {
            start + d * (2.0 * xf - s as f64) / (2.0 * m)
        };
    }
    for x in s + n..total {
        path[x] = start + end - path[total - 1 - x];
    }
    // Pin the endpoints against rounding.
    path[0] = start;
    path[total - 1] = end;

    tracing::debug!(
        elements = total,
        ramp = s,
        linear = n,
        start,
        end,
        "constant-velocity path defined"
    );
    Ok(Trajectory {
        path,
        pulse_start_element: s + 1,
        pulse_stop_element: total - s - 1,
        total_time: span,
        ramp_elements: s,
    })
}

/// Back-and-forth path: forward (`start → end`) and backward sub-paths of
/// `segment_element_count` elements each, joined without repeating the
/// turning-point sample, truncated to `total_element_count`.
pub fn define_oscillation_path(
    start: f64,
    end: f64,
    segment_duration_s: f64,
    total_element_count: usize,
    acceleration_time_s: f64,
    segment_element_count: usize,
) -> Result<Trajectory, TrajError> {
    if segment_element_count < 2 {
        return Err(TrajError::PathTooShort {
            wanted: total_element_count,
            generated: segment_element_count,
        });
    }
    let forward = define_constant_velocity_path(
        start,
        end,
        segment_duration_s,
        segment_element_count,
        acceleration_time_s,
    )?;
    let backward: Vec<f64> = forward.path.iter().rev().copied().collect();
    let s = forward.ramp_elements;

    let mut path = forward.path.clone();
    let mut forward_next = false;
    while path.len() < total_element_count {
        let seg = if forward_next {
            &forward.path
        } else {
            &backward
        };
        path.extend_from_slice(&seg[1..]);
        forward_next = !forward_next;
    }
    path.truncate(total_element_count);

    let total = path.len();
    if total < 2 * s + MIN_LINEAR_ELEMENTS {
        return Err(TrajError::PathTooShort {
            wanted: 2 * s + MIN_LINEAR_ELEMENTS,
            generated: total,
        });
    }
    let segments = (total - 1) as f64 / (segment_element_count - 1) as f64;
    tracing::debug!(
        elements = total,
        segment_elements = segment_element_count,
        segments,
        "oscillation path defined"
    );
    Ok(Trajectory {
        path,
        pulse_start_element: s + 1,
        pulse_stop_element: total - s - 1,
        total_time: forward.total_time * segments,
        ramp_elements: s,
    })
}

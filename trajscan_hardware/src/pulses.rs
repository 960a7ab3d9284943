//! Where a trajectory device fires its output pulses.

/// Positions along `path` at which `pulse_count` pulses fire when they are
/// spread evenly over the 1-based element window `pulse_start..=pulse_stop`.
///
/// Fractional element indices are linearly interpolated. Out-of-range window
/// bounds are clamped to the path; an empty path yields no samples.
pub fn sample_at_pulses(
    path: &[f64],
    pulse_start: usize,
    pulse_stop: usize,
    pulse_count: usize,
) -> Vec<f64> {
    if path.is_empty() || pulse_count == 0 {
        return Vec::new();
    }
    let last = path.len();
    let first = pulse_start.clamp(1, last) as f64;
    let stop = pulse_stop.clamp(1, last) as f64;
    let span = stop - first;
    (0..pulse_count)
        .map(|j| {
            let frac = if pulse_count == 1 {
                0.0
            } else {
                j as f64 / (pulse_count - 1) as f64
            };
            interpolate(path, first + span * frac)
        })
        .collect()
}

/// Value of `path` at a 1-based fractional element index.
fn interpolate(path: &[f64], element: f64) -> f64 {
    let idx = (element - 1.0).max(0.0);
    let lo = idx.floor() as usize;
    if lo + 1 >= path.len() {
        return path[path.len() - 1];
    }
    let t = idx - lo as f64;
    path[lo] + (path[lo + 1] - path[lo]) * t
}

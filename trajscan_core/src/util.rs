//! Common time and cancellation helpers for trajscan_core.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Length of the next bounded wait: never longer than `poll`, never longer
/// than what is left, and at least 1 ms so a zero poll cannot spin.
#[inline]
pub fn wait_slice(remaining: Duration, poll: Duration) -> Duration {
    remaining.min(poll).max(Duration::from_millis(1))
}

/// Shared cancellation flag observed by every bounded wait.
///
/// Clones share the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

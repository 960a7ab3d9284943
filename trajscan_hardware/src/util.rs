use std::time::Duration;

use trajscan_traits::Clock;

use crate::error::{HwError, Result};

/// Wait until `done` returns true, or `timeout` expires on `clock`.
/// Sleeps in `poll_interval` steps to avoid CPU spinning.
pub fn wait_until_with_timeout(
    clock: &dyn Clock,
    mut done: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = clock.now() + timeout;
    while !done() {
        if clock.now() >= deadline {
            return Err(HwError::Timeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}

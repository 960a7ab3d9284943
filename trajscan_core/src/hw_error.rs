//! Maps `Box<dyn Error>` from the channel boundary to typed `TrajError`.
//!
//! Channels report failures as `Box<dyn Error + Send + Sync>`; this module
//! downcasts the simulated channel layer's `HwError` when it is the source
//! and falls back to the error text otherwise.

use trajscan_hardware::HwError;

use crate::error::TrajError;
use crate::status::Phase;

/// Map a channel error raised while driving `phase` to a typed `TrajError`.
pub fn map_channel_error(phase: Phase, e: &(dyn std::error::Error + 'static)) -> TrajError {
    if let Some(hw) = e.downcast_ref::<HwError>() {
        let message = match hw {
            HwError::Disconnected(name) => format!("channel {name} disconnected"),
            HwError::Timeout => "channel timeout".to_string(),
            other => other.to_string(),
        };
        return TrajError::Device { phase, message };
    }
    TrajError::Device {
        phase,
        message: e.to_string(),
    }
}

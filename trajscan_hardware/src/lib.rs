//! Simulated channel layer and trajectory device.

pub mod error;
pub mod ioc;
pub mod pulses;
pub mod pv;
pub mod util;

pub use error::HwError;
pub use ioc::{IocSettings, SimTrajectoryIoc, state_code, status_code};
pub use pulses::sample_at_pulses;
pub use pv::{Completion, PutHook, SimChannelFactory, SimPv, SimValue};

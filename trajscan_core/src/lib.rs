#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Trajectory scan engine (device-agnostic).
//!
//! Drives a set of motion axes through a precisely timed path while a pulse
//! train triggers a detector, then reads back the achieved positions. All
//! device interaction goes through `trajscan_traits::ChannelFactory`
//! channels or the channel-free simulated controller.
//!
//! ## Architecture
//!
//! - **Path synthesis**: constant-velocity and oscillation paths (`path`)
//! - **Controller**: configure / build / execute / read state machine (`controller`, `sim`)
//! - **Adapter**: step-scan lifecycle on top of the phases (`adapter`)
//! - **Deferred readback**: positions requested before they are known (`deferred`)
//! - **Runner**: whole scan lines and scans (`runner`)

pub mod adapter;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod deferred;
pub mod error;
pub mod hw_error;
pub mod observer;
pub mod path;
pub mod runner;
pub mod sim;
pub mod status;
pub mod util;

pub use adapter::{ContinuousAxisAdapter, ContinuousParameters};
pub use config::{AdapterCfg, ControllerLimits, MotionCfg, SimulationCfg, Timeouts};
pub use controller::{AxisSlot, ChannelTrajectoryController, TrajectoryController};
pub use deferred::{DeferredPosition, DeferredPositionReader};
pub use error::{ErrorKind, Result, TrajError};
pub use observer::{StatusBus, StatusSubscription};
pub use path::{Trajectory, define_constant_velocity_path, define_oscillation_path, sample_at_pulses};
pub use runner::{LineReport, run_line, run_scan};
pub use sim::SimulatedTrajectoryController;
pub use status::{Phase, PhaseSnapshot, PhaseState, PhaseStatus};
pub use util::CancelToken;

pub mod channel;
pub mod clock;
pub mod names;

pub use channel::{
    ArrayChannel, ChannelError, ChannelFactory, FloatChannel, IntChannel, MonitorCallback,
    ProcessVariable, PutCallback, PutStatus, Subscription, TextChannel,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use names::{AXIS_SLOTS, TrajectoryPvNames};

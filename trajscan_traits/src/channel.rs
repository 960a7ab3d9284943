//! Contract for a single remote control point ("process variable").
//!
//! The trajectory engine never speaks a wire protocol itself. Every remote
//! value it touches (element counts, trigger points, status enums, arrays of
//! positions) is reached through a [`ProcessVariable`] handed out by a
//! [`ChannelFactory`]. Completion callbacks and monitor callbacks may be
//! invoked from a thread owned by the channel layer.

use std::fmt;
use std::sync::Arc;

/// Error surfaced by the channel layer at the trait boundary.
pub type ChannelError = Box<dyn std::error::Error + Send + Sync>;

/// Completion state reported to a put-with-callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// The remote side processed the write and finished the associated action.
    Normal,
    /// The remote side reported the put as failed or disconnected.
    Failed,
}

/// Callback fired once when a put-with-callback completes.
pub type PutCallback = Box<dyn FnOnce(PutStatus) + Send + 'static>;

/// Callback fired on every value change of a monitored channel.
pub type MonitorCallback<V> = Box<dyn Fn(&V) + Send + Sync + 'static>;

/// Handle for an active monitor. Dropping it (or calling `unsubscribe`)
/// removes the monitor.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that owns no monitor.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Remove the monitor now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// One remote scalar or array control point.
pub trait ProcessVariable<V>: Send + Sync {
    /// Remote name of the control point.
    fn name(&self) -> &str;

    fn get(&self) -> Result<V, ChannelError>;

    fn put(&self, value: V) -> Result<(), ChannelError>;

    /// Write `value` and invoke `cb` once the remote side reports completion.
    ///
    /// An `Err` return means the write was never issued and `cb` will not be
    /// called.
    fn put_with_callback(&self, value: V, cb: PutCallback) -> Result<(), ChannelError>;

    fn subscribe(&self, cb: MonitorCallback<V>) -> Result<Subscription, ChannelError>;
}

pub type IntChannel = Arc<dyn ProcessVariable<i32>>;
pub type FloatChannel = Arc<dyn ProcessVariable<f64>>;
pub type ArrayChannel = Arc<dyn ProcessVariable<Vec<f64>>>;
pub type TextChannel = Arc<dyn ProcessVariable<String>>;

/// Resolves remote names to typed channels.
pub trait ChannelFactory: Send + Sync {
    fn int(&self, name: &str) -> Result<IntChannel, ChannelError>;
    fn float(&self, name: &str) -> Result<FloatChannel, ChannelError>;
    fn array(&self, name: &str) -> Result<ArrayChannel, ChannelError>;
    fn text(&self, name: &str) -> Result<TextChannel, ChannelError>;
}

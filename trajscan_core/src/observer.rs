//! Typed fan-out of phase outcomes.
//!
//! Every subscriber owns an unbounded `crossbeam-channel` receiver. Publishing
//! snapshots the sender list under the lock and sends after releasing it, so
//! a slow subscriber never blocks the publisher or other subscribers. There
//! is no ordering guarantee across subscribers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crossbeam_channel as xch;

struct Registry<T> {
    next_id: u64,
    senders: Vec<(u64, xch::Sender<T>)>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct StatusBus<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for StatusBus<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }
}

impl<T: Clone + Send + 'static> StatusBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> StatusSubscription<T> {
        let (tx, rx) = xch::unbounded();
        let mut reg = lock(&self.registry);
        let id = reg.next_id;
        reg.next_id += 1;
        reg.senders.push((id, tx));
        StatusSubscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `value` to every live subscriber. Returns how many received it.
    pub fn publish(&self, value: T) -> usize {
        let targets: Vec<(u64, xch::Sender<T>)> = lock(&self.registry).senders.clone();
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(value.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            lock(&self.registry)
                .senders
                .retain(|(id, _)| !dead.contains(id));
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).senders.len()
    }
}

/// Live subscription. Dropping it, or calling [`StatusSubscription::unsubscribe`],
/// stops delivery.
pub struct StatusSubscription<T> {
    id: u64,
    rx: xch::Receiver<T>,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> StatusSubscription<T> {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, xch::RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<T, xch::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn unsubscribe(self) {}

    fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).senders.retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T> Drop for StatusSubscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

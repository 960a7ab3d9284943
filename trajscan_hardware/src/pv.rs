//! In-memory process variables.
//!
//! `SimPv` behaves like a remote control point: client writes notify every
//! monitor, and a put-with-callback completes either immediately or when an
//! installed put hook decides so (the simulated device uses hooks for its
//! trigger points). Monitor and completion callbacks run on whichever thread
//! performed the write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use trajscan_traits::{
    ArrayChannel, ChannelError, ChannelFactory, FloatChannel, IntChannel, MonitorCallback,
    ProcessVariable, PutCallback, PutStatus, Subscription, TextChannel,
};

use crate::error::{HwError, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pending completion of a put-with-callback.
///
/// Dropping it without calling [`Completion::complete`] means the callback
/// never fires, which is how a hung remote action looks to the client.
pub struct Completion {
    name: String,
    cb: Option<PutCallback>,
}

impl Completion {
    pub fn complete(mut self, status: PutStatus) {
        if let Some(cb) = self.cb.take() {
            cb(status);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.cb.is_some() {
            tracing::trace!(pv = %self.name, "put callback dropped without completion");
        }
    }
}

/// Device-side reaction to a put-with-callback.
pub type PutHook<V> = dyn Fn(&V, Completion) + Send + Sync;

type Monitor<V> = Arc<dyn Fn(&V) + Send + Sync>;

struct Monitors<V> {
    next_id: u64,
    entries: Vec<(u64, Monitor<V>)>,
}

pub struct SimPv<V> {
    name: String,
    value: Mutex<V>,
    monitors: Arc<Mutex<Monitors<V>>>,
    hook: Mutex<Option<Arc<PutHook<V>>>>,
    connected: AtomicBool,
    reject_puts: AtomicBool,
    swallow_callbacks: AtomicBool,
    unlatched_puts: AtomicUsize,
    puts: AtomicUsize,
}

impl<V: Clone + Send + Sync + 'static> SimPv<V> {
    pub fn new(name: impl Into<String>, initial: V) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(initial),
            monitors: Arc::new(Mutex::new(Monitors {
                next_id: 0,
                entries: Vec::new(),
            })),
            hook: Mutex::new(None),
            connected: AtomicBool::new(true),
            reject_puts: AtomicBool::new(false),
            swallow_callbacks: AtomicBool::new(false),
            unlatched_puts: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Current value, as the device sees it.
    pub fn value(&self) -> V {
        lock(&self.value).clone()
    }

    /// Device-side update: stores the value and notifies monitors. Not
    /// counted as a client put.
    pub fn set(&self, value: V) {
        *lock(&self.value) = value.clone();
        self.notify(&value);
    }

    /// Number of client writes accepted so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn set_put_hook(&self, hook: Arc<PutHook<V>>) {
        *lock(&self.hook) = Some(hook);
    }

    pub fn clear_put_hook(&self) {
        lock(&self.hook).take();
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Refuse client writes until turned off again.
    pub fn reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::Relaxed);
    }

    /// Accept writes but never fire their completion callbacks.
    pub fn swallow_callbacks(&self, swallow: bool) {
        self.swallow_callbacks.store(swallow, Ordering::Relaxed);
    }

    /// Accept the next `n` plain puts without storing their values.
    pub fn drop_next_puts(&self, n: usize) {
        self.unlatched_puts.store(n, Ordering::Relaxed);
    }

    pub fn monitor_count(&self) -> usize {
        lock(&self.monitors).entries.len()
    }

    fn notify(&self, value: &V) {
        let targets: Vec<Monitor<V>> = lock(&self.monitors)
            .entries
            .iter()
            .map(|(_, m)| m.clone())
            .collect();
        for m in targets {
            m(value);
        }
    }

    fn check_writable(&self) -> Result<()> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(HwError::Disconnected(self.name.clone()));
        }
        if self.reject_puts.load(Ordering::Relaxed) {
            return Err(HwError::PutRejected(self.name.clone()));
        }
        Ok(())
    }

    fn write(&self, value: V) -> Result<V> {
        self.check_writable()?;
        *lock(&self.value) = value.clone();
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.notify(&value);
        Ok(value)
    }
}

impl<V: Clone + Send + Sync + 'static> ProcessVariable<V> for SimPv<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self) -> std::result::Result<V, ChannelError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(HwError::Disconnected(self.name.clone()).into());
        }
        Ok(self.value())
    }

    fn put(&self, value: V) -> std::result::Result<(), ChannelError> {
        let unlatched = self
            .unlatched_puts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if unlatched {
            self.check_writable()?;
            self.puts.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(pv = %self.name, "put accepted but not latched");
            return Ok(());
        }
        self.write(value)?;
        Ok(())
    }

    fn put_with_callback(
        &self,
        value: V,
        cb: PutCallback,
    ) -> std::result::Result<(), ChannelError> {
        let value = self.write(value)?;
        let done = Completion {
            name: self.name.clone(),
            cb: Some(cb),
        };
        if self.swallow_callbacks.load(Ordering::Relaxed) {
            drop(done);
            return Ok(());
        }
        let hook = lock(&self.hook).clone();
        match hook {
            Some(hook) => hook(&value, done),
            None => done.complete(PutStatus::Normal),
        }
        Ok(())
    }

    fn subscribe(&self, cb: MonitorCallback<V>) -> std::result::Result<Subscription, ChannelError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(HwError::Disconnected(self.name.clone()).into());
        }
        let monitor: Monitor<V> = Arc::from(cb);
        let id = {
            let mut g = lock(&self.monitors);
            let id = g.next_id;
            g.next_id += 1;
            g.entries.push((id, monitor.clone()));
            id
        };
        // Monitors start with the current value.
        monitor(&self.value());
        let weak: Weak<Mutex<Monitors<V>>> = Arc::downgrade(&self.monitors);
        Ok(Subscription::new(move || {
            if let Some(monitors) = weak.upgrade() {
                lock(&monitors).entries.retain(|(mid, _)| *mid != id);
            }
        }))
    }
}

#[doc(hidden)]
pub enum Entry {
    Int(Arc<SimPv<i32>>),
    Float(Arc<SimPv<f64>>),
    Array(Arc<SimPv<Vec<f64>>>),
    Text(Arc<SimPv<String>>),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Int(_) => i32::TYPE_NAME,
            Entry::Float(_) => f64::TYPE_NAME,
            Entry::Array(_) => <Vec<f64>>::TYPE_NAME,
            Entry::Text(_) => String::TYPE_NAME,
        }
    }
}

/// Value types a simulated channel can carry.
pub trait SimValue: Clone + Default + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
    fn wrap(pv: Arc<SimPv<Self>>) -> Entry;
    fn unwrap(entry: &Entry) -> Option<Arc<SimPv<Self>>>;
}

macro_rules! sim_value {
    ($ty:ty, $variant:ident, $label:literal) => {
        impl SimValue for $ty {
            const TYPE_NAME: &'static str = $label;
            fn wrap(pv: Arc<SimPv<Self>>) -> Entry {
                Entry::$variant(pv)
            }
            fn unwrap(entry: &Entry) -> Option<Arc<SimPv<Self>>> {
                match entry {
                    Entry::$variant(pv) => Some(pv.clone()),
                    _ => None,
                }
            }
        }
    };
}

sim_value!(i32, Int, "int");
sim_value!(f64, Float, "float");
sim_value!(Vec<f64>, Array, "array");
sim_value!(String, Text, "text");

/// Registry of simulated channels keyed by remote name.
///
/// A lenient factory creates unknown channels on first use with a default
/// value; a strict one only hands out channels that were declared.
pub struct SimChannelFactory {
    entries: Mutex<HashMap<String, Entry>>,
    strict: bool,
}

impl Default for SimChannelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChannelFactory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            strict: false,
        }
    }

    pub fn strict() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            strict: true,
        }
    }

    /// Create (or reset) a channel with an initial value.
    pub fn declare<V: SimValue>(&self, name: &str, initial: V) -> Result<Arc<SimPv<V>>> {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.get(name) {
            let pv = V::unwrap(existing).ok_or_else(|| HwError::TypeMismatch {
                name: name.to_string(),
                existing: existing.type_name(),
                requested: V::TYPE_NAME,
            })?;
            drop(entries);
            pv.set(initial);
            return Ok(pv);
        }
        let pv = Arc::new(SimPv::new(name, initial));
        entries.insert(name.to_string(), V::wrap(pv.clone()));
        Ok(pv)
    }

    /// Typed handle to a channel, creating it unless the factory is strict.
    pub fn pv<V: SimValue>(&self, name: &str) -> Result<Arc<SimPv<V>>> {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.get(name) {
            return V::unwrap(existing).ok_or_else(|| HwError::TypeMismatch {
                name: name.to_string(),
                existing: existing.type_name(),
                requested: V::TYPE_NAME,
            });
        }
        if self.strict {
            return Err(HwError::UnknownChannel(name.to_string()));
        }
        let pv = Arc::new(SimPv::new(name, V::default()));
        entries.insert(name.to_string(), V::wrap(pv.clone()));
        Ok(pv)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelFactory for SimChannelFactory {
    fn int(&self, name: &str) -> std::result::Result<IntChannel, ChannelError> {
        Ok(self.pv::<i32>(name)?)
    }

    fn float(&self, name: &str) -> std::result::Result<FloatChannel, ChannelError> {
        Ok(self.pv::<f64>(name)?)
    }

    fn array(&self, name: &str) -> std::result::Result<ArrayChannel, ChannelError> {
        Ok(self.pv::<Vec<f64>>(name)?)
    }

    fn text(&self, name: &str) -> std::result::Result<TextChannel, ChannelError> {
        Ok(self.pv::<String>(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn monitor_sees_current_value_then_updates() {
        let pv = SimPv::new("X", 1i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = pv
            .subscribe(Box::new(move |v: &i32| s.lock().unwrap().push(*v)))
            .unwrap();
        pv.put(2).unwrap();
        pv.set(3);
        drop(sub);
        pv.put(4).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(pv.monitor_count(), 0);
        assert_eq!(pv.put_count(), 2);
    }

    #[test]
    fn put_without_hook_completes_normally() {
        let pv = SimPv::new("X", 0i32);
        let (tx, rx) = mpsc::channel();
        pv.put_with_callback(1, Box::new(move |st| tx.send(st).unwrap()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), PutStatus::Normal);
    }

    #[test]
    fn swallowed_callbacks_never_fire() {
        let pv = SimPv::new("X", 0i32);
        pv.swallow_callbacks(true);
        let (tx, rx) = mpsc::channel::<PutStatus>();
        pv.put_with_callback(1, Box::new(move |st| tx.send(st).unwrap()))
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(pv.value(), 1);
    }

    #[test]
    fn hook_decides_completion() {
        let pv = SimPv::new("X", 0i32);
        pv.set_put_hook(Arc::new(|v: &i32, done: Completion| {
            if *v > 0 {
                done.complete(PutStatus::Failed);
            }
        }));
        let (tx, rx) = mpsc::channel();
        pv.put_with_callback(5, Box::new(move |st| tx.send(st).unwrap()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), PutStatus::Failed);
    }

    #[test]
    fn unlatched_put_is_counted_but_not_stored() {
        let pv = SimPv::new("X", 0i32);
        pv.drop_next_puts(1);
        pv.put(7).unwrap();
        assert_eq!(pv.value(), 0);
        pv.put(7).unwrap();
        assert_eq!(pv.value(), 7);
        assert_eq!(pv.put_count(), 2);
    }

    #[test]
    fn disconnected_channel_refuses_io() {
        let pv = SimPv::new("X", 0i32);
        pv.set_connected(false);
        assert!(pv.get().is_err());
        assert!(pv.put(1).is_err());
        assert_eq!(pv.put_count(), 0);
    }

    #[test]
    fn factory_reuses_channels_and_checks_types() {
        let f = SimChannelFactory::new();
        let a = f.int("P:NELM").unwrap();
        a.put(10).unwrap();
        assert_eq!(f.pv::<i32>("P:NELM").unwrap().value(), 10);
        let err = f.pv::<f64>("P:NELM").err().unwrap();
        assert!(matches!(err, HwError::TypeMismatch { .. }));
    }

    #[test]
    fn strict_factory_only_serves_declared_names() {
        let f = SimChannelFactory::strict();
        assert!(matches!(
            f.pv::<i32>("P:NELM"),
            Err(HwError::UnknownChannel(_))
        ));
        f.declare("P:NELM", 3i32).unwrap();
        assert_eq!(f.int("P:NELM").unwrap().get().unwrap(), 3);
    }
}

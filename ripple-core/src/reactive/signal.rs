//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a shared, mutable cell
//! holding a current and a previous value, plus an ordered list of
//! listeners notified on dispatch.
//!
//! # How Signals Work
//!
//! 1. `set` stores a value (after the optional interceptor) without
//!    notifying anybody.
//!
//! 2. `dispatch` stores a value and stages every listener with the batching
//!    coordinator. Outside a batch the stage is flushed right away.
//!
//! 3. Listeners receive `(new, old, extra)`. Inside a batch `old` is the
//!    value before the first mutation of the batch, so intermediate values
//!    never leak.
//!
//! # Thread Safety
//!
//! Signals are `Send + Sync`: the cell is protected by a `RwLock` and the
//! registry by a `Mutex`. No lock is held while a callback runs, so
//! listeners may read or dispatch into any signal, including their own.
//!
//! Batches are per thread, so the value a signal had before a batch is
//! recorded per thread too. A dispatch on another thread sees the signal's
//! committed state, not the first thread's batch.
//!
//! # Identity
//!
//! Cloning a signal clones the handle, not the value. Equality is identity.
//! Each signal carries a [`SignalId`] drawn from a global counter; the id
//! keeps no reference to the signal.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::batch::{self, Settle};
use super::listener::{
    Callback, Detach, DerivationLink, Extra, HookFn, HookOptions, Listener, ListenerId, Registry,
    Subscription,
};

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a dispatch does to the stored value before notifying.
pub enum Dispatch<'a, T> {
    /// Store a new value.
    Value(T),
    /// Call the function with the current value. The value is left as is.
    Inspect(Box<dyn FnOnce(&T) + 'a>),
    /// Leave the value untouched and only notify.
    Notify,
}

impl<T: Debug> Debug for Dispatch<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Dispatch::Inspect(_) => f.write_str("Inspect(..)"),
            Dispatch::Notify => f.write_str("Notify"),
        }
    }
}

type Interceptor<T> = Arc<dyn Fn(&T) -> Option<T> + Send + Sync>;

/// Value recorded before the first deferred mutation, tagged with the
/// mutation count at the time so overlapping deferrals keep the earliest.
struct Start<T> {
    epoch: u64,
    value: T,
}

struct CellState<T> {
    current: T,
    previous: T,
    /// Number of mutations so far.
    epoch: u64,
    /// Value before the first mutation of the running batch, per thread
    /// with an open batch.
    batch_starts: SmallVec<[(ThreadId, Start<T>); 1]>,
    /// Value before the first mutation under a hold.
    hold_start: Option<Start<T>>,
}

impl<T> CellState<T> {
    fn batch_start(&self, thread: ThreadId) -> Option<&Start<T>> {
        self.batch_starts
            .iter()
            .find(|(owner, _)| *owner == thread)
            .map(|(_, start)| start)
    }

    fn take_batch_start(&mut self, thread: ThreadId) -> Option<Start<T>> {
        let index = self
            .batch_starts
            .iter()
            .position(|(owner, _)| *owner == thread)?;
        Some(self.batch_starts.swap_remove(index).1)
    }

    /// The value `thread` reports as `old` while a deferral is pending.
    fn pending_old(&self, thread: ThreadId) -> Option<&T> {
        match (self.batch_start(thread), self.hold_start.as_ref()) {
            (Some(batch), Some(hold)) if hold.epoch < batch.epoch => Some(&hold.value),
            (Some(batch), _) => Some(&batch.value),
            (None, hold) => hold.map(|hold| &hold.value),
        }
    }
}

pub(crate) struct SignalInner<T> {
    id: SignalId,
    height: u32,
    state: RwLock<CellState<T>>,
    interceptor: RwLock<Option<Interceptor<T>>>,
    listeners: Mutex<Registry<T>>,
    /// Number of active holds.
    holds: AtomicUsize,
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use ripple_core::Signal;
///
/// let count = Signal::new(0);
/// count.hook(|value, old, _| println!("count: {old} -> {value}"));
///
/// count.dispatch(1);
/// assert_eq!(count.get(), 1);
/// assert_eq!(count.previous(), 0);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal; current and previous both start at `value`.
    pub fn new(value: T) -> Self {
        Self::with_height(value, 0)
    }

    pub(crate) fn with_height(value: T, height: u32) -> Self {
        let inner = SignalInner {
            id: SignalId::next(),
            height,
            state: RwLock::new(CellState {
                previous: value.clone(),
                current: value,
                epoch: 0,
                batch_starts: SmallVec::new(),
                hold_start: None,
            }),
            interceptor: RwLock::new(None),
            listeners: Mutex::new(Registry::new()),
            holds: AtomicUsize::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// Derivation height: zero for plain signals, one more than the highest
    /// source for derived ones.
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.state.read().current.clone()
    }

    /// Get the value the signal held before its last mutation.
    pub fn previous(&self) -> T {
        self.inner.state.read().previous.clone()
    }

    /// Store a value without notifying listeners.
    ///
    /// The interceptor runs first; if it panics the signal is left
    /// untouched.
    pub fn set(&self, value: T) {
        let interceptor = self.inner.interceptor.read().clone();
        let value = match interceptor {
            Some(intercept) => intercept(&value).unwrap_or(value),
            None => value,
        };
        self.inner.store(value);
    }

    /// Store a value and notify listeners.
    pub fn dispatch(&self, value: T) {
        self.dispatch_with(Dispatch::Value(value), None);
    }

    /// Compute the next value from the current one and dispatch it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get());
        self.dispatch(next);
    }

    /// Call `f` with the current value, then notify listeners. The return
    /// value of `f` is not stored.
    pub fn inspect<F>(&self, f: F)
    where
        F: FnOnce(&T),
    {
        self.dispatch_with(Dispatch::Inspect(Box::new(f)), None);
    }

    /// Notify listeners with the current value.
    pub fn notify(&self) {
        self.dispatch_with(Dispatch::Notify, None);
    }

    /// General form of dispatch, forwarding `extra` to every listener.
    pub fn dispatch_with(&self, action: Dispatch<'_, T>, extra: Option<Extra>) {
        match action {
            Dispatch::Value(value) => self.set(value),
            Dispatch::Inspect(f) => f(&self.get()),
            Dispatch::Notify => {}
        }

        if self.inner.is_held() {
            tracing::trace!(signal = %self.inner.id, "dispatch held");
            return;
        }

        batch::batch(|| self.inner.stage(extra));
    }

    /// Register a listener with default options.
    pub fn hook<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T, &T, Option<&Extra>) + Send + Sync + 'static,
    {
        self.hook_with(HookOptions::default(), callback)
    }

    /// Register a listener with explicit options.
    pub fn hook_with<F>(&self, options: HookOptions, callback: F) -> Subscription
    where
        F: Fn(&T, &T, Option<&Extra>) + Send + Sync + 'static,
    {
        let callback: HookFn<T> = Arc::new(callback);

        if options.immediate {
            let (current, previous) = {
                let state = self.inner.state.read();
                (state.current.clone(), state.previous.clone())
            };
            callback(&current, &previous, None);
            if options.once {
                return Subscription::detached();
            }
        }

        let listener = Arc::new(Listener::new(options, Callback::Hook(callback)));
        self.inner.attach(listener)
    }

    /// Install the interceptor, replacing any previous one.
    ///
    /// The interceptor sees every incoming value; returning `None` keeps
    /// the proposed value.
    pub fn intercept<F>(&self, f: F)
    where
        F: Fn(&T) -> Option<T> + Send + Sync + 'static,
    {
        *self.inner.interceptor.write() = Some(Arc::new(f));
    }

    /// Remove the interceptor.
    pub fn clear_intercept(&self) {
        *self.inner.interceptor.write() = None;
    }

    /// Remove every listener, including links to derived signals.
    pub fn remove_all(&self) {
        let removed = self.inner.listeners.lock().clear();
        drop(removed);
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub(crate) fn link(&self, link: DerivationLink) -> Subscription {
        let listener = Arc::new(Listener::new(
            HookOptions::default(),
            Callback::Derivation(link),
        ));
        self.inner.attach(listener)
    }

    pub(crate) fn downgrade(&self) -> Weak<SignalInner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SignalInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

impl<T> SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_held(&self) -> bool {
        self.holds.load(Ordering::Acquire) > 0
    }

    fn store(self: &Arc<Self>, value: T) {
        let deferred = batch::is_batching();
        let held = self.is_held();
        {
            let mut state = self.state.write();
            state.epoch += 1;
            let epoch = state.epoch;
            if deferred {
                let thread = thread::current().id();
                if state.batch_start(thread).is_none() {
                    let start = Start {
                        epoch,
                        value: state.current.clone(),
                    };
                    state.batch_starts.push((thread, start));
                }
            }
            if held && state.hold_start.is_none() {
                let start = Start {
                    epoch,
                    value: state.current.clone(),
                };
                state.hold_start = Some(start);
            }
            if deferred || held {
                state.current = value;
            } else {
                let old = std::mem::replace(&mut state.current, value);
                state.previous = old;
            }
        }
        if deferred {
            batch::touch(self.id, self.clone());
        }
    }

    fn attach(self: &Arc<Self>, listener: Arc<Listener<T>>) -> Subscription {
        let id = listener.id();
        self.listeners.lock().insert(listener);
        tracing::trace!(signal = %self.id, listener = ?id, "listener attached");
        let weak = Arc::downgrade(self);
        let owner: Weak<dyn Detach> = weak;
        Subscription::new(id, owner)
    }

    /// Stage this signal's listeners with the coordinator. Must run inside a
    /// batch.
    ///
    /// Hook listeners are staged as one delivery for the whole signal, so a
    /// later dispatch in the same batch replaces it. The delivery walks the
    /// registry as it is at flush time.
    fn stage(self: &Arc<Self>, extra: Option<Extra>) {
        let change = {
            let state = self.state.read();
            let old = state
                .pending_old(thread::current().id())
                .unwrap_or(&state.previous)
                .clone();
            (state.current.clone(), old)
        };
        let listeners = self.listeners.lock().snapshot();
        batch::touch(self.id, self.clone());
        tracing::trace!(signal = %self.id, listeners = listeners.len(), "dispatch staged");

        let mut hooks: SmallVec<[ListenerId; 8]> = SmallVec::new();
        for listener in listeners {
            let derivation = match listener.callback() {
                Callback::Hook(_) => None,
                Callback::Derivation(link) => Some((link.height, link.key)),
            };
            let Some((height, key)) = derivation else {
                hooks.push(listener.id());
                continue;
            };
            batch::stage_derivation(
                height,
                key,
                Box::new(move || {
                    if !listener.is_alive() {
                        return;
                    }
                    if let Callback::Derivation(link) = listener.callback() {
                        if let Some(derivation) = link.recompute.upgrade() {
                            derivation.recompute();
                        }
                    }
                }),
            );
        }

        if hooks.is_empty() {
            return;
        }
        hooks.sort_unstable();
        let owner = Arc::clone(self);
        batch::stage_call(
            self.id,
            Box::new(move || {
                let (new, old) = &change;
                owner.deliver_staged(&hooks, new, old, extra.as_ref());
            }),
        );
    }

    /// Deliver to the `staged` listeners (sorted ids) in current registry
    /// order.
    fn deliver_staged(&self, staged: &[ListenerId], new: &T, old: &T, extra: Option<&Extra>) {
        let listeners = self.listeners.lock().snapshot();
        for listener in listeners {
            if staged.binary_search(&listener.id()).is_ok() {
                self.deliver(&listener, new, old, extra);
            }
        }
    }

    fn deliver(&self, listener: &Listener<T>, new: &T, old: &T, extra: Option<&Extra>) {
        if listener.options().once {
            if !listener.kill() {
                return;
            }
            let removed = self.listeners.lock().remove(listener.id());
            drop(removed);
        } else if !listener.is_alive() {
            return;
        }

        if let Callback::Hook(callback) = listener.callback() {
            callback(new, old, extra);
        }
    }

    fn release_hold(&self) {
        let _ = self
            .holds
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Fold a pending hold start into `previous` without notifying.
    fn abandon_hold(&self) {
        if self.is_held() {
            return;
        }
        let mut state = self.state.write();
        if let Some(start) = state.hold_start.take() {
            state.previous = start.value;
        }
    }
}

impl<T> Settle for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fold the calling thread's batch start, and a released hold's start,
    /// into `previous`. A start kept for a hold that is still active stays
    /// until its release.
    fn settle(&self) {
        let held = self.is_held();
        let mut state = self.state.write();
        let batch = state.take_batch_start(thread::current().id());
        let hold = if held { None } else { state.hold_start.take() };
        let start = match (batch, hold) {
            (Some(batch), Some(hold)) if hold.epoch < batch.epoch => Some(hold),
            (Some(batch), _) => Some(batch),
            (None, hold) => hold,
        };
        if let Some(start) = start {
            state.previous = start.value;
        }
    }
}

impl<T> Detach for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn detach(&self, id: ListenerId) {
        let removed = self.listeners.lock().remove(id);
        if removed.is_some() {
            tracing::trace!(signal = %self.id, listener = ?id, "listener detached");
        }
    }

    fn is_attached(&self, id: ListenerId) -> bool {
        self.listeners.lock().contains(id)
    }
}

/// Type-erased view of a signal, used where sources of different value
/// types are mixed (merging, holding, dynamic derivation).
pub trait AnySignal: Send + Sync {
    fn id(&self) -> SignalId;

    fn height(&self) -> u32;

    /// Clone the current value behind `dyn Any`.
    fn value_any(&self) -> Box<dyn Any + Send>;

    /// Notify listeners without changing the value.
    fn notify(&self);

    /// Register a listener that ignores the payload.
    fn on_fire(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Subscription;

    /// Clone this handle into a shared trait object.
    fn erase(&self) -> Arc<dyn AnySignal>;

    #[doc(hidden)]
    fn link(&self, link: DerivationLink) -> Subscription;

    /// Add (`true`) or remove (`false`) one hold. Holds are counted; the
    /// signal notifies again once every hold is removed.
    #[doc(hidden)]
    fn set_held(&self, held: bool);

    /// Drop the value recorded under a finished hold without notifying.
    #[doc(hidden)]
    fn abandon_hold(&self);
}

impl<T> AnySignal for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.inner.id
    }

    fn height(&self) -> u32 {
        self.inner.height
    }

    fn value_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.get())
    }

    fn notify(&self) {
        Signal::notify(self);
    }

    fn on_fire(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        self.hook(move |_, _, _| callback())
    }

    fn erase(&self) -> Arc<dyn AnySignal> {
        Arc::new(self.clone())
    }

    fn link(&self, link: DerivationLink) -> Subscription {
        Signal::link(self, link)
    }

    fn set_held(&self, held: bool) {
        if held {
            self.inner.holds.fetch_add(1, Ordering::AcqRel);
        } else {
            self.inner.release_hold();
        }
    }

    fn abandon_hold(&self) {
        self.inner.abandon_hold();
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Signal<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> PartialEq for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Signal<T> where T: Clone + Send + Sync + 'static {}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::batch::batch;
    use std::sync::atomic::AtomicI32;

    fn recorder<T: Clone + Send + Sync + 'static>(
    ) -> (Arc<Mutex<Vec<(T, T)>>>, impl Fn(&T, &T, Option<&Extra>) + Send + Sync + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |new: &T, old: &T, _: Option<&Extra>| {
            sink.lock().push((new.clone(), old.clone()))
        })
    }

    #[test]
    fn new_signal_has_equal_current_and_previous() {
        let signal = Signal::new("hello".to_string());
        assert_eq!(signal.get(), "hello");
        assert_eq!(signal.previous(), "hello");
    }

    #[test]
    fn set_moves_current_into_previous() {
        let signal = Signal::new(1);
        signal.set(2);
        assert_eq!(signal.get(), 2);
        assert_eq!(signal.previous(), 1);
    }

    #[test]
    fn set_does_not_notify() {
        let signal = Signal::new(0);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);
        signal.set(5);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn dispatch_notifies_with_new_and_old() {
        let signal = Signal::new(0);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);

        signal.dispatch(1);
        signal.dispatch(2);
        assert_eq!(*calls.lock(), vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn update_computes_from_current() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
        assert_eq!(signal.previous(), 10);
    }

    #[test]
    fn inspect_sees_current_and_keeps_value() {
        let signal = Signal::new(7);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);

        let seen = Arc::new(AtomicI32::new(0));
        let sink = seen.clone();
        signal.inspect(move |v| sink.store(*v, Ordering::SeqCst));

        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(signal.get(), 7);
        assert_eq!(*calls.lock(), vec![(7, 7)]);
    }

    #[test]
    fn notify_fires_without_changing_value() {
        let signal = Signal::new(3);
        signal.dispatch(4);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);

        signal.notify();
        assert_eq!(*calls.lock(), vec![(4, 3)]);
    }

    #[test]
    fn extra_payload_reaches_listeners() {
        let signal = Signal::new(0);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        signal.hook(move |_, _, extra| {
            *sink.lock() = extra.and_then(|e| e.downcast_ref::<&str>().copied());
        });

        let extra: Extra = Arc::new("user-input");
        signal.dispatch_with(Dispatch::Value(1), Some(extra));
        assert_eq!(*seen.lock(), Some("user-input"));
    }

    #[test]
    fn interceptor_rewrites_incoming_values() {
        let signal = Signal::new(0);
        signal.intercept(|v: &i32| Some((*v).clamp(0, 10)));
        signal.dispatch(42);
        assert_eq!(signal.get(), 10);

        // None keeps the proposed value.
        signal.intercept(|_: &i32| None);
        signal.dispatch(42);
        assert_eq!(signal.get(), 42);

        signal.clear_intercept();
        signal.dispatch(-1);
        assert_eq!(signal.get(), -1);
    }

    #[test]
    fn panicking_interceptor_leaves_signal_untouched() {
        let signal = Signal::new(1);
        signal.dispatch(2);
        signal.intercept(|_: &i32| panic!("rejected"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| signal.dispatch(3)));
        assert!(result.is_err());
        assert_eq!(signal.get(), 2);
        assert_eq!(signal.previous(), 1);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let subscription = signal.hook(move |_, _, _| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.dispatch(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(subscription.is_active());

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        signal.dispatch(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_listener_fires_exactly_once() {
        let signal = Signal::new(0);
        let (calls, hook) = recorder::<i32>();
        let subscription = signal.hook_with(HookOptions::new().once(), hook);

        for v in 1..=5 {
            signal.dispatch(v);
        }
        assert_eq!(*calls.lock(), vec![(1, 0)]);
        assert!(!subscription.is_active());
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn immediate_listener_fires_at_registration() {
        let signal = Signal::new(1);
        signal.dispatch(2);
        let (calls, hook) = recorder::<i32>();
        signal.hook_with(HookOptions::new().immediate(), hook);
        assert_eq!(*calls.lock(), vec![(2, 1)]);

        signal.dispatch(3);
        assert_eq!(*calls.lock(), vec![(2, 1), (3, 2)]);
    }

    #[test]
    fn immediate_once_listener_is_never_registered() {
        let signal = Signal::new(1);
        let (calls, hook) = recorder::<i32>();
        let subscription = signal.hook_with(HookOptions::new().immediate().once(), hook);

        assert_eq!(*calls.lock(), vec![(1, 1)]);
        assert_eq!(signal.listener_count(), 0);
        assert!(!subscription.is_active());

        signal.dispatch(2);
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn listeners_fire_in_bucket_order() {
        let signal = Signal::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |name: &'static str| {
            let order = order.clone();
            move |_: &i32, _: &i32, _: Option<&Extra>| order.lock().push(name)
        };

        signal.hook_with(HookOptions::new().after_all(), push("last"));
        signal.hook(push("normal-1"));
        signal.hook_with(HookOptions::new().before_all(), push("first"));
        signal.hook(push("normal-2"));

        signal.dispatch(1);
        assert_eq!(*order.lock(), vec!["first", "normal-1", "normal-2", "last"]);
    }

    #[test]
    fn listeners_respect_before_and_after() {
        let signal = Signal::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |name: &'static str| {
            let order = order.clone();
            move |_: &i32, _: &i32, _: Option<&Extra>| order.lock().push(name)
        };

        signal.hook_with(HookOptions::new().id("render").after("layout"), push("render"));
        signal.hook_with(HookOptions::new().id("layout"), push("layout"));
        signal.hook_with(HookOptions::new().id("input").before("layout"), push("input"));

        signal.dispatch(1);
        assert_eq!(*order.lock(), vec!["input", "layout", "render"]);
    }

    #[test]
    fn remove_all_clears_listeners() {
        let signal = Signal::new(0);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);
        signal.hook(|_, _, _| {});
        assert_eq!(signal.listener_count(), 2);

        signal.remove_all();
        assert_eq!(signal.listener_count(), 0);
        signal.dispatch(1);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn listener_may_dispatch_into_its_own_signal() {
        let signal = Signal::new(0);
        let handle = signal.clone();
        signal.hook(move |value: &i32, _, _| {
            if *value < 3 {
                handle.dispatch(value + 1);
            }
        });

        signal.dispatch(1);
        assert_eq!(signal.get(), 3);
    }

    #[test]
    fn batch_start_value_is_reported_as_old() {
        let signal = Signal::new(0);
        let (calls, hook) = recorder::<i32>();
        signal.hook(hook);

        batch(|| {
            signal.dispatch(1);
            signal.dispatch(2);
            signal.dispatch(3);
        });
        assert_eq!(*calls.lock(), vec![(3, 0)]);
        assert_eq!(signal.previous(), 0);

        signal.dispatch(4);
        assert_eq!(*calls.lock(), vec![(3, 0), (4, 3)]);
    }

    #[test]
    fn clone_shares_state_and_identity() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.dispatch(42);
        assert_eq!(signal2.get(), 42);
        assert_eq!(signal1, signal2);
        assert_ne!(signal1, Signal::new(42));
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn default_signal_uses_default_value() {
        let signal: Signal<Option<String>> = Signal::default();
        assert_eq!(signal.get(), None);
    }
}

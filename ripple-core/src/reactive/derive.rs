//! Derivation Engine
//!
//! A derived signal holds `compute(sources)` and is recomputed eagerly when
//! any source fires.
//!
//! # How Derivations Work
//!
//! 1. The initial value is computed synchronously at construction.
//!
//! 2. A derivation link is registered on every source. When a source
//!    dispatches, the link stages one recomputation with the batching
//!    coordinator, keyed by the derived signal, so several sources firing
//!    in the same flush still recompute once.
//!
//! 3. Pending recomputations run lowest height first. A derived signal's
//!    height is one more than its highest source, so every source is
//!    settled before its dependents recompute and chains and diamonds
//!    never observe stale intermediate values.
//!
//! 4. Inside an explicit `batch` the recomputation waits for the flush:
//!    reading a derived value in the middle of a batch returns the value
//!    from before the batch.
//!
//! # Ownership
//!
//! Sources hold their links weakly. A derived signal stops updating, and
//! its links are removed, once every [`Derived`] handle is dropped.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::listener::{DerivationLink, Extra, HookOptions, Subscription};
use super::signal::{AnySignal, Signal, SignalId};
use crate::error::{ArgumentKind, Result, SignalError};

/// A pending recomputation target.
pub trait Recompute: Send + Sync {
    fn recompute(&self);
}

/// Anything that can be read as a derivation source.
pub trait Readable: Clone + Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    fn read(&self) -> Self::Value;

    fn as_any_signal(&self) -> &dyn AnySignal;
}

impl<T> Readable for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> T {
        self.get()
    }

    fn as_any_signal(&self) -> &dyn AnySignal {
        self
    }
}

impl<T> Readable for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn read(&self) -> T {
        self.get()
    }

    fn as_any_signal(&self) -> &dyn AnySignal {
        self
    }
}

/// A fixed set of derivation sources.
///
/// Implemented for tuples of one to eight [`Readable`]s; the compute
/// function receives the tuple of their values.
pub trait Sources: Send + Sync + 'static {
    type Values;

    fn read_all(&self) -> Self::Values;

    fn for_each(&self, f: &mut dyn FnMut(&dyn AnySignal));
}

macro_rules! impl_sources {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Readable),+> Sources for ($($name,)+) {
            type Values = ($($name::Value,)+);

            fn read_all(&self) -> Self::Values {
                ($(self.$idx.read(),)+)
            }

            fn for_each(&self, f: &mut dyn FnMut(&dyn AnySignal)) {
                $(f(self.$idx.as_any_signal());)+
            }
        }
    };
}

impl_sources!(A: 0);
impl_sources!(A: 0, B: 1);
impl_sources!(A: 0, B: 1, C: 2);
impl_sources!(A: 0, B: 1, C: 2, D: 3);
impl_sources!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_sources!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_sources!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_sources!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

struct Derivation<S, F, R>
where
    R: Clone + Send + Sync + 'static,
{
    sources: S,
    compute: F,
    target: Signal<R>,
    links: Mutex<SmallVec<[Subscription; 4]>>,
}

impl<S, F, R> Recompute for Derivation<S, F, R>
where
    S: Sources,
    F: Fn(S::Values) -> R + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn recompute(&self) {
        let next = (self.compute)(self.sources.read_all());
        tracing::trace!(signal = %self.target.id(), "derived signal recomputed");
        self.target.dispatch(next);
    }
}

impl<S, F, R> Drop for Derivation<S, F, R>
where
    R: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        for link in self.links.get_mut().drain(..) {
            link.unsubscribe();
        }
    }
}

/// A read-only signal whose value is computed from other signals.
///
/// There is no `dispatch` or `set`: the value only changes when a source
/// fires.
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    signal: Signal<T>,
    _derivation: Arc<dyn Recompute>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> SignalId {
        self.signal.id()
    }

    pub fn height(&self) -> u32 {
        self.signal.height()
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Get the value before the last recomputation.
    pub fn previous(&self) -> T {
        self.signal.previous()
    }

    pub fn hook<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T, &T, Option<&Extra>) + Send + Sync + 'static,
    {
        self.signal.hook(callback)
    }

    pub fn hook_with<F>(&self, options: HookOptions, callback: F) -> Subscription
    where
        F: Fn(&T, &T, Option<&Extra>) + Send + Sync + 'static,
    {
        self.signal.hook_with(options, callback)
    }

    /// Remove every listener, including links to signals derived from this
    /// one.
    pub fn remove_all(&self) {
        self.signal.remove_all();
    }

    pub fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }
}

impl<T> AnySignal for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.signal.id()
    }

    fn height(&self) -> u32 {
        self.signal.height()
    }

    fn value_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.get())
    }

    fn notify(&self) {
        self.signal.notify();
    }

    fn on_fire(&self, callback: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        self.signal.on_fire(callback)
    }

    fn erase(&self) -> Arc<dyn AnySignal> {
        Arc::new(self.clone())
    }

    fn link(&self, link: DerivationLink) -> Subscription {
        AnySignal::link(&self.signal, link)
    }

    fn set_held(&self, held: bool) {
        self.signal.set_held(held);
    }

    fn abandon_hold(&self) {
        self.signal.abandon_hold();
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            _derivation: Arc::clone(&self._derivation),
        }
    }
}

impl<T> PartialEq for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.signal == other.signal
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id())
            .field("height", &self.height())
            .field("value", &self.get())
            .finish()
    }
}

/// Build a derived signal from a tuple of sources.
///
/// ```rust
/// use ripple_core::{derive, Signal};
///
/// let first = Signal::new("Ada".to_string());
/// let last = Signal::new("Lovelace".to_string());
/// let full = derive((first.clone(), last.clone()), |(f, l)| format!("{f} {l}"));
/// assert_eq!(full.get(), "Ada Lovelace");
///
/// last.dispatch("Byron".to_string());
/// assert_eq!(full.get(), "Ada Byron");
/// ```
pub fn derive<S, F, R>(sources: S, compute: F) -> Derived<R>
where
    S: Sources,
    F: Fn(S::Values) -> R + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    let mut height = 0;
    sources.for_each(&mut |source| height = height.max(source.height() + 1));

    let initial = compute(sources.read_all());
    let target = Signal::with_height(initial, height);

    let derivation = Arc::new(Derivation {
        sources,
        compute,
        target: target.clone(),
        links: Mutex::new(SmallVec::new()),
    });

    let weak: Weak<dyn Recompute> = {
        let erased: Arc<dyn Recompute> = derivation.clone();
        Arc::downgrade(&erased)
    };
    let mut links = SmallVec::new();
    derivation.sources.for_each(&mut |source| {
        links.push(source.link(DerivationLink {
            key: target.id(),
            height,
            recompute: weak.clone(),
        }));
    });
    *derivation.links.lock() = links;

    tracing::trace!(signal = %target.id(), height, "derived signal created");

    Derived {
        signal: target,
        _derivation: derivation,
    }
}

// ----------------------------------------------------------------------------
// Runtime-checked derivation
// ----------------------------------------------------------------------------

type DynCompute<R> = Box<dyn Fn(&DynValues) -> R + Send + Sync>;

/// One argument of [`derive_dynamic`].
pub enum DeriveArg<R> {
    Source(Arc<dyn AnySignal>),
    Compute(DynCompute<R>),
}

impl<R> DeriveArg<R> {
    pub fn source(signal: &dyn AnySignal) -> Self {
        DeriveArg::Source(signal.erase())
    }

    pub fn compute<F>(f: F) -> Self
    where
        F: Fn(&DynValues) -> R + Send + Sync + 'static,
    {
        DeriveArg::Compute(Box::new(f))
    }

    fn kind(&self) -> ArgumentKind {
        match self {
            DeriveArg::Source(_) => ArgumentKind::Source,
            DeriveArg::Compute(_) => ArgumentKind::Compute,
        }
    }
}

impl<R> Debug for DeriveArg<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeriveArg::Source(source) => f.debug_tuple("Source").field(&source.id()).finish(),
            DeriveArg::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// Source values handed to a dynamic compute function, by position.
pub struct DynValues {
    values: Vec<Box<dyn Any + Send>>,
}

impl DynValues {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value of source `index`, if it exists and holds a `T`.
    pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.values.get(index)?.downcast_ref::<T>()
    }
}

struct DynSources(SmallVec<[Arc<dyn AnySignal>; 4]>);

impl Sources for DynSources {
    type Values = DynValues;

    fn read_all(&self) -> DynValues {
        DynValues {
            values: self.0.iter().map(|source| source.value_any()).collect(),
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&dyn AnySignal)) {
        for source in &self.0 {
            f(source.as_ref());
        }
    }
}

/// Build a derived signal from runtime-checked arguments: one or more
/// sources followed by exactly one compute function.
pub fn derive_dynamic<R>(args: Vec<DeriveArg<R>>) -> Result<Derived<R>>
where
    R: Clone + Send + Sync + 'static,
{
    if args.len() < 2 {
        return Err(SignalError::Arity { given: args.len() });
    }

    let last = args.len() - 1;
    let mut sources = SmallVec::new();
    let mut compute = None;

    for (position, arg) in args.into_iter().enumerate() {
        match (position == last, arg) {
            (false, DeriveArg::Source(source)) => sources.push(source),
            (true, DeriveArg::Compute(f)) => compute = Some(f),
            (is_last, arg) => {
                let expected = if is_last {
                    ArgumentKind::Compute
                } else {
                    ArgumentKind::Source
                };
                debug_assert_ne!(arg.kind(), expected);
                return Err(SignalError::ArgumentType { position, expected });
            }
        }
    }

    let compute = compute.ok_or(SignalError::ArgumentType {
        position: last,
        expected: ArgumentKind::Compute,
    })?;

    Ok(derive(DynSources(sources), move |values| compute(&values)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

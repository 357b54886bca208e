//! Listener registry.
//!
//! Every signal owns an ordered list of listeners ("hooks"). Listeners carry
//! ordering metadata ([`HookOptions`]) and a liveness flag. The flag is what
//! makes unsubscription immediate: a call staged for a pending flush checks
//! it at delivery time, so a listener removed after staging never fires.
//!
//! # Ordering
//!
//! The list is re-arranged after every registration:
//!
//! 1. `before_all` listeners, in registration order
//! 2. normal listeners, sorted by their `before` / `after` constraints
//! 3. `after_all` listeners, in registration order
//!
//! Constraints refer to other listeners by `id`. Unconstrained listeners keep
//! registration order and only the constrained listener is moved. Listeners
//! caught in a constraint cycle fall back to registration order among
//! themselves.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::derive::Recompute;
use super::signal::SignalId;

/// Arbitrary payload forwarded from a dispatch to its listeners.
pub type Extra = Arc<dyn Any + Send + Sync>;

/// Callback signature for listeners: `(new, old, extra)`.
pub type HookFn<T> = Arc<dyn Fn(&T, &T, Option<&Extra>) + Send + Sync>;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registration options for [`Signal::hook_with`](super::Signal::hook_with).
///
/// Built either as a struct literal or with the chained setters:
///
/// ```rust
/// use ripple_core::HookOptions;
///
/// let options = HookOptions::new().id("render").after("layout").once();
/// assert!(options.once);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOptions {
    /// Name other listeners can refer to in `before` / `after`.
    pub id: Option<String>,
    /// Invoke once with `(current, previous)` at registration time.
    pub immediate: bool,
    /// Deregister after the first delivery.
    pub once: bool,
    /// Run before the listeners whose id matches.
    pub before: Option<String>,
    /// Run after the listeners whose id matches.
    pub after: Option<String>,
    /// Run ahead of every normal listener.
    pub before_all: bool,
    /// Run behind every normal listener.
    pub after_all: bool,
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before = Some(id.into());
        self
    }

    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after = Some(id.into());
        self
    }

    pub fn before_all(mut self) -> Self {
        self.before_all = true;
        self
    }

    pub fn after_all(mut self) -> Self {
        self.after_all = true;
        self
    }
}

/// Edge from a source signal to a derived signal that must recompute when
/// the source fires.
pub struct DerivationLink {
    /// Identity of the derived signal; pending recomputations dedupe on it.
    pub key: SignalId,
    /// Derivation height of the derived signal.
    pub height: u32,
    pub recompute: Weak<dyn Recompute>,
}

pub(crate) enum Callback<T> {
    Hook(HookFn<T>),
    Derivation(DerivationLink),
}

/// A registered listener.
pub(crate) struct Listener<T> {
    id: ListenerId,
    options: HookOptions,
    alive: AtomicBool,
    callback: Callback<T>,
}

impl<T> Listener<T> {
    pub(crate) fn new(options: HookOptions, callback: Callback<T>) -> Self {
        Self {
            id: ListenerId::new(),
            options,
            alive: AtomicBool::new(true),
            callback,
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn options(&self) -> &HookOptions {
        &self.options
    }

    pub(crate) fn callback(&self) -> &Callback<T> {
        &self.callback
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the listener dead. Returns whether it was alive before.
    pub(crate) fn kill(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

/// Ordered listener list owned by one signal.
pub(crate) struct Registry<T> {
    listeners: Vec<Arc<Listener<T>>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, listener: Arc<Listener<T>>) {
        self.listeners.push(listener);
        self.rearrange();
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<Arc<Listener<T>>> {
        let index = self.listeners.iter().position(|l| l.id() == id)?;
        let listener = self.listeners.remove(index);
        listener.kill();
        Some(listener)
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|l| l.id() == id)
    }

    /// Remove and kill every listener. The caller drops the returned list
    /// after releasing the registry lock, since a listener may own the last
    /// handle on a derivation that detaches itself on drop.
    pub(crate) fn clear(&mut self) -> Vec<Arc<Listener<T>>> {
        let removed: Vec<_> = self.listeners.drain(..).collect();
        for listener in &removed {
            listener.kill();
        }
        removed
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Listener<T>>> {
        self.listeners.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    fn rearrange(&mut self) {
        let order = {
            let options: Vec<&HookOptions> = self.listeners.iter().map(|l| l.options()).collect();
            arrange(&options)
        };
        let mut slots: Vec<Option<Arc<Listener<T>>>> =
            self.listeners.drain(..).map(Some).collect();
        self.listeners = order.into_iter().filter_map(|i| slots[i].take()).collect();
    }
}

/// Compute the delivery order for listeners registered with `options`,
/// given in registration order. Returns indices into `options`.
pub(crate) fn arrange(options: &[&HookOptions]) -> Vec<usize> {
    let mut head = Vec::new();
    let mut normal = Vec::new();
    let mut tail = Vec::new();

    for (index, option) in options.iter().enumerate() {
        if option.before_all {
            head.push(index);
        } else if option.after_all {
            tail.push(index);
        } else {
            normal.push(index);
        }
    }

    let sorted = order_constrained(&normal, options);
    head.into_iter().chain(sorted).chain(tail).collect()
}

/// Stable topological sort of the normal bucket.
///
/// Listeners are placed in registration order except where a constraint
/// says otherwise. Only the constrained listener moves: `after` holds it
/// back until its target is placed, and `before` ranks it at its target's
/// position so it lands just ahead of it. Constraints between listeners on
/// a common cycle are dropped, which leaves those listeners in registration
/// order while every other constraint still holds.
fn order_constrained(normal: &[usize], options: &[&HookOptions]) -> Vec<usize> {
    let constrained = normal
        .iter()
        .any(|&i| options[i].before.is_some() || options[i].after.is_some());
    if !constrained {
        return normal.to_vec();
    }

    let n = normal.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    // `before` edges only, from the constrained listener to its target.
    let mut pulls: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (a, &ia) in normal.iter().enumerate() {
        let option_a = options[ia];
        for (b, &ib) in normal.iter().enumerate() {
            if a == b {
                continue;
            }
            let Some(id_b) = options[ib].id.as_deref() else {
                continue;
            };
            if option_a.after.as_deref() == Some(id_b) {
                successors[b].push(a);
            }
            if option_a.before.as_deref() == Some(id_b) {
                successors[a].push(b);
                pulls[a].push(b);
            }
        }
    }

    let reach: Vec<Vec<bool>> = (0..n).map(|i| reachable(i, &successors)).collect();
    for (from, targets) in successors.iter_mut().enumerate() {
        targets.retain(|&to| !reach[to][from]);
    }
    for (from, targets) in pulls.iter_mut().enumerate() {
        targets.retain(|&to| !reach[to][from]);
    }

    let rank: Vec<usize> = (0..n)
        .map(|i| {
            let pulled = reachable(i, &pulls);
            (0..n).find(|&j| pulled[j]).unwrap_or(i)
        })
        .collect();

    let mut indegree = vec![0usize; n];
    for targets in &successors {
        for &to in targets {
            indegree[to] += 1;
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = (0..n)
        .filter(|&i| indegree[i] == 0)
        .map(|i| (rank[i], i))
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some((_, next)) = ready.pop_first() {
        order.push(normal[next]);
        for &successor in &successors[next] {
            indegree[successor] -= 1;
            if indegree[successor] == 0 {
                ready.insert((rank[successor], successor));
            }
        }
    }

    order
}

/// Nodes reachable from `start`, `start` included.
fn reachable(start: usize, edges: &[Vec<usize>]) -> Vec<bool> {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![start];
    seen[start] = true;
    while let Some(node) = stack.pop() {
        for &next in &edges[node] {
            if !seen[next] {
                seen[next] = true;
                stack.push(next);
            }
        }
    }
    seen
}

/// Type-erased handle on a signal's registry, used by [`Subscription`].
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId);
    fn is_attached(&self, id: ListenerId) -> bool;
}

struct Detached;

impl Detach for Detached {
    fn detach(&self, _id: ListenerId) {}

    fn is_attached(&self, _id: ListenerId) -> bool {
        false
    }
}

/// Handle returned by `hook`; call [`unsubscribe`](Self::unsubscribe) to
/// stop receiving notifications.
///
/// Dropping a subscription does not unsubscribe. It holds the signal
/// weakly, so it never keeps the signal alive.
#[derive(Clone)]
pub struct Subscription {
    id: ListenerId,
    owner: Weak<dyn Detach>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, owner: Weak<dyn Detach>) -> Self {
        Self { id, owner }
    }

    /// A subscription for a listener that was never registered
    /// (`immediate` + `once`).
    pub(crate) fn detached() -> Self {
        let owner: Weak<dyn Detach> = Weak::<Detached>::new();
        Self {
            id: ListenerId::new(),
            owner,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.owner
            .upgrade()
            .map(|owner| owner.is_attached(self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Batching Coordinator
//!
//! Every notification goes through a per-thread coordinator. It keeps a
//! nesting depth and a ledger of staged work:
//!
//! - pending derivations, keyed by the derived signal and ordered by height
//! - pending listener deliveries, one per signal, in staging order
//! - signals mutated since the last delivery round ("touched")
//!
//! A dispatch always stages its listeners inside a batch scope. When the
//! outermost scope exits the ledger is flushed:
//!
//! 1. Run every pending derivation, lowest height first. Each one
//!    recomputes a derived signal, which stages that signal's own
//!    listeners and derivations.
//! 2. Once no derivation is pending, settle the touched signals and deliver
//!    the staged deliveries. A signal staged several times delivers once
//!    with its last staged arguments, to its listeners in registry order.
//! 3. Dispatches made by listeners are staged again; repeat until empty.
//!
//! The depth stays at one while the flush drains, so `batch` calls made by
//! listeners nest instead of flushing recursively.
//!
//! # Threads
//!
//! The coordinator is thread-local. Signals may be shared between threads,
//! but a batch scope only defers dispatches made on the thread that opened
//! it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::signal::SignalId;

/// Work staged for delivery at flush time.
pub(crate) type PendingCall = Box<dyn FnOnce()>;

/// Signals that recorded a batch-start value and must fold it into their
/// previous value once their listeners have been staged, or when the batch
/// unwinds.
pub(crate) trait Settle {
    fn settle(&self);
}

/// Per-thread tuning for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Delivery rounds a single flush may run before the remaining
    /// notifications are dropped. Guards against listeners that keep
    /// re-dispatching into each other.
    pub max_flush_rounds: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_flush_rounds: 10_000,
        }
    }
}

#[derive(Default)]
struct Coordinator {
    depth: usize,
    config: BatchConfig,
    derivations: BTreeMap<(u32, SignalId), PendingCall>,
    calls: IndexMap<SignalId, PendingCall>,
    touched: IndexMap<SignalId, Arc<dyn Settle>>,
}

/// Everything taken out of the ledger in one go.
#[derive(Default)]
struct Round {
    calls: IndexMap<SignalId, PendingCall>,
    touched: IndexMap<SignalId, Arc<dyn Settle>>,
}

impl Round {
    fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.touched.is_empty()
    }
}

thread_local! {
    static COORDINATOR: RefCell<Coordinator> = RefCell::new(Coordinator::default());
}

/// Guard for one level of batch nesting.
///
/// Dropping the guard only restores the depth. When the outermost scope is
/// dropped during a panic, the ledger is discarded so that stale
/// notifications do not leak into the next flush, and the touched signals
/// are settled so their batch-start values do not either.
struct BatchScope {
    _private: (),
}

impl BatchScope {
    fn enter() -> Self {
        COORDINATOR.with(|c| c.borrow_mut().depth += 1);
        Self { _private: () }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let discarded = COORDINATOR.with(|c| {
            let mut c = c.borrow_mut();
            c.depth = c.depth.saturating_sub(1);
            if c.depth == 0 && std::thread::panicking() {
                Some(c.take_all())
            } else {
                None
            }
        });
        // Settled and dropped outside the borrow: closures may own the last
        // handle on a signal.
        if let Some((_, round)) = discarded {
            for signal in round.touched.values() {
                signal.settle();
            }
        }
    }
}

impl Coordinator {
    fn take_all(&mut self) -> (BTreeMap<(u32, SignalId), PendingCall>, Round) {
        let derivations = std::mem::take(&mut self.derivations);
        let round = Round {
            calls: std::mem::take(&mut self.calls),
            touched: std::mem::take(&mut self.touched),
        };
        (derivations, round)
    }
}

/// Run `f` with notification delivery deferred until the outermost batch
/// exits.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use ripple_core::{batch, Signal};
///
/// let count = Signal::new(0);
/// let calls = Arc::new(AtomicUsize::new(0));
/// let seen = calls.clone();
/// count.hook(move |_, _, _| {
///     seen.fetch_add(1, Ordering::SeqCst);
/// });
///
/// batch(|| {
///     count.dispatch(1);
///     count.dispatch(2);
/// });
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let result = {
        let _scope = BatchScope::enter();
        f()
    };
    if depth() == 0 {
        flush();
    }
    result
}

/// Current batch nesting depth on this thread.
pub fn depth() -> usize {
    COORDINATOR.with(|c| c.borrow().depth)
}

/// Whether delivery is currently deferred on this thread.
pub fn is_batching() -> bool {
    depth() > 0
}

/// Install `config` for this thread.
pub fn configure(config: BatchConfig) {
    COORDINATOR.with(|c| c.borrow_mut().config = config);
}

/// The configuration active on this thread.
pub fn config() -> BatchConfig {
    COORDINATOR.with(|c| c.borrow().config)
}

/// Stage the delivery for signal `id`, replacing any delivery already
/// staged for it.
pub(crate) fn stage_call(id: SignalId, call: PendingCall) {
    COORDINATOR.with(|c| {
        c.borrow_mut().calls.insert(id, call);
    });
}

/// Stage the recomputation of the derived signal `key`.
pub(crate) fn stage_derivation(height: u32, key: SignalId, run: PendingCall) {
    COORDINATOR.with(|c| {
        c.borrow_mut().derivations.insert((height, key), run);
    });
}

/// Record that `signal` was mutated in the current batch.
pub(crate) fn touch(id: SignalId, signal: Arc<dyn Settle>) {
    COORDINATOR.with(|c| {
        c.borrow_mut().touched.entry(id).or_insert(signal);
    });
}

fn next_derivation() -> Option<PendingCall> {
    COORDINATOR.with(|c| c.borrow_mut().derivations.pop_first().map(|(_, run)| run))
}

fn take_round() -> Round {
    COORDINATOR.with(|c| {
        let mut c = c.borrow_mut();
        Round {
            calls: std::mem::take(&mut c.calls),
            touched: std::mem::take(&mut c.touched),
        }
    })
}

fn flush() {
    let _span = tracing::trace_span!("flush").entered();
    let _scope = BatchScope::enter();
    let limit = config().max_flush_rounds;
    let mut rounds = 0usize;

    loop {
        if let Some(run) = next_derivation() {
            run();
            continue;
        }

        let round = take_round();
        if round.is_empty() {
            break;
        }

        rounds += 1;
        if rounds > limit {
            tracing::warn!(
                rounds,
                dropped = round.calls.len(),
                "flush round limit reached, dropping pending notifications"
            );
            let rest = COORDINATOR.with(|c| c.borrow_mut().take_all());
            for signal in round.touched.values().chain(rest.1.touched.values()) {
                signal.settle();
            }
            break;
        }

        tracing::trace!(round = rounds, calls = round.calls.len(), "delivering");
        for signal in round.touched.values() {
            signal.settle();
        }
        for (_, call) in round.calls {
            call();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<usize>>, impl Fn() -> PendingCall) {
        let count = Rc::new(Cell::new(0));
        let handle = count.clone();
        let make = move || -> PendingCall {
            let count = handle.clone();
            Box::new(move || count.set(count.get() + 1))
        };
        (count, make)
    }

    #[test]
    fn depth_tracks_nesting() {
        assert_eq!(depth(), 0);
        batch(|| {
            assert_eq!(depth(), 1);
            batch(|| assert_eq!(depth(), 2));
            assert_eq!(depth(), 1);
        });
        assert_eq!(depth(), 0);
        assert!(!is_batching());
    }

    #[test]
    fn staged_calls_wait_for_outermost_exit() {
        let (count, make) = counter();
        batch(|| {
            batch(|| stage_call(SignalId::next(), make()));
            assert_eq!(count.get(), 0);
        });
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn restaging_replaces_the_pending_call() {
        let (count, make) = counter();
        let id = SignalId::next();
        batch(|| {
            stage_call(id, make());
            stage_call(id, make());
            stage_call(id, make());
        });
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn derivations_run_by_height_before_calls() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b, c) = (SignalId::next(), SignalId::next(), SignalId::next());
        batch(|| {
            let l = log.clone();
            stage_call(SignalId::next(), Box::new(move || l.borrow_mut().push("call")));
            let l = log.clone();
            stage_derivation(2, a, Box::new(move || l.borrow_mut().push("h2")));
            let l = log.clone();
            stage_derivation(1, b, Box::new(move || l.borrow_mut().push("h1")));
            let l = log.clone();
            stage_derivation(1, c, Box::new(move || l.borrow_mut().push("h1")));
        });
        assert_eq!(*log.borrow(), vec!["h1", "h1", "h2", "call"]);
    }

    #[test]
    fn calls_staged_during_flush_run_in_a_later_round() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        batch(|| {
            stage_call(
                SignalId::next(),
                Box::new(move || {
                    l.borrow_mut().push("first");
                    assert!(is_batching());
                    let inner = l.clone();
                    stage_call(SignalId::next(), Box::new(move || inner.borrow_mut().push("second")));
                }),
            );
        });
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn runaway_flush_stops_at_round_limit() {
        fn restage(count: Rc<Cell<usize>>, id: SignalId) {
            let next = count.clone();
            stage_call(
                id,
                Box::new(move || {
                    next.set(next.get() + 1);
                    restage(next.clone(), id);
                }),
            );
        }

        configure(BatchConfig { max_flush_rounds: 5 });
        let count = Rc::new(Cell::new(0));
        batch(|| restage(count.clone(), SignalId::next()));
        assert_eq!(count.get(), 5);
        configure(BatchConfig::default());

        // The ledger is empty again afterwards.
        let (after, make) = counter();
        batch(|| stage_call(SignalId::next(), make()));
        assert_eq!(after.get(), 1);
    }

    #[test]
    fn panic_inside_batch_restores_depth_and_discards_ledger() {
        let (count, make) = counter();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| {
                stage_call(SignalId::next(), make());
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert_eq!(depth(), 0);

        batch(|| {});
        assert_eq!(count.get(), 0);
    }

    struct Settled(Cell<usize>);

    impl Settle for Settled {
        fn settle(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn panic_inside_batch_settles_touched_signals() {
        let settled = Arc::new(Settled(Cell::new(0)));
        let touched: Arc<dyn Settle> = settled.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| {
                touch(SignalId::next(), touched);
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert_eq!(settled.0.get(), 1);
    }
}

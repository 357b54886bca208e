//! Held signals.
//!
//! Holding a set of signals silences them until the hold is released: a
//! held signal still stores every dispatched value but stages nothing.
//! On release each signal notifies once, inside a batch, with its final
//! value and the value it had before the first mutation under the hold.
//!
//! Holds are counted: when holds overlap, a signal stays silent until the
//! last of them is released, and then reports the value it had before the
//! first.
//!
//! This is the targeted counterpart of [`batch`](super::batch()): instead
//! of deferring every dispatch on the thread for a dynamic extent, it
//! defers a chosen set of signals until an explicit release.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::batch::batch;
use super::signal::AnySignal;

/// A set of held signals. Released explicitly with [`Held::release`] or
/// when dropped.
#[must_use = "held signals stay silent until released"]
pub struct Held {
    sources: SmallVec<[Arc<dyn AnySignal>; 4]>,
    released: bool,
}

/// Hold `sources` until the returned [`Held`] is released.
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use ripple_core::{hold, Signal};
///
/// let count = Signal::new(0);
/// let last_old = Arc::new(AtomicI32::new(-1));
/// let sink = last_old.clone();
/// count.hook(move |_, old, _| sink.store(*old, Ordering::SeqCst));
///
/// let held = hold(&[&count]);
/// count.dispatch(1);
/// count.dispatch(2);
/// assert_eq!(last_old.load(Ordering::SeqCst), -1);
///
/// held.release();
/// assert_eq!(last_old.load(Ordering::SeqCst), 0);
/// ```
pub fn hold(sources: &[&dyn AnySignal]) -> Held {
    let mut seen = HashSet::new();
    let sources: SmallVec<[Arc<dyn AnySignal>; 4]> = sources
        .iter()
        .filter(|source| seen.insert(source.id()))
        .map(|source| source.erase())
        .collect();

    for source in &sources {
        source.set_held(true);
    }
    tracing::trace!(signals = sources.len(), "signals held");

    Held {
        sources,
        released: false,
    }
}

/// Hold `sources` for the duration of `f`, then release them.
pub fn hold_while<R>(sources: &[&dyn AnySignal], f: impl FnOnce() -> R) -> R {
    let held = hold(sources);
    let result = f();
    held.release();
    result
}

impl Held {
    /// Number of distinct signals held.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Lift the hold and notify every held signal once.
    pub fn release(mut self) {
        self.release_inner(true);
    }

    fn release_inner(&mut self, notify: bool) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        for source in &self.sources {
            source.set_held(false);
        }
        if notify {
            tracing::trace!(signals = self.sources.len(), "held signals released");
            batch(|| {
                for source in &self.sources {
                    source.notify();
                }
            });
        } else {
            for source in &self.sources {
                source.abandon_hold();
            }
        }
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        // No callbacks while unwinding.
        let notify = !std::thread::panicking();
        self.release_inner(notify);
    }
}

impl fmt::Debug for Held {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<_> = self.sources.iter().map(|s| s.id()).collect();
        f.debug_struct("Held")
            .field("sources", &ids)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use parking_lot::Mutex;

    fn recorder(signal: &Signal<i32>) -> Arc<Mutex<Vec<(i32, i32)>>> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        signal.hook(move |new, old, _| sink.lock().push((*new, *old)));
        calls
    }

    #[test]
    fn held_signal_defers_until_release() {
        let a = Signal::new(0);
        let b = Signal::new(10);
        let (calls_a, calls_b) = (recorder(&a), recorder(&b));

        let held = hold(&[&a, &b]);
        a.dispatch(1);
        b.dispatch(11);
        assert!(calls_a.lock().is_empty());
        assert!(calls_b.lock().is_empty());
        assert_eq!(a.get(), 1);

        held.release();
        assert_eq!(*calls_a.lock(), vec![(1, 0)]);
        assert_eq!(*calls_b.lock(), vec![(11, 10)]);
    }

    #[test]
    fn repeated_dispatches_collapse_to_one_notification() {
        let a = Signal::new(0);
        let calls = recorder(&a);

        let held = hold(&[&a]);
        a.dispatch(1);
        a.dispatch(2);
        a.dispatch(3);
        held.release();

        assert_eq!(*calls.lock(), vec![(3, 0)]);
        assert_eq!(a.previous(), 0);

        // Back to immediate delivery.
        a.dispatch(4);
        assert_eq!(*calls.lock(), vec![(3, 0), (4, 3)]);
    }

    #[test]
    fn duplicate_sources_are_held_once() {
        let a = Signal::new(0);
        let calls = recorder(&a);

        let held = hold(&[&a, &a, &a]);
        assert_eq!(held.len(), 1);
        a.dispatch(1);
        held.release();
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn release_inside_batch_waits_for_outer_flush() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let (calls_a, calls_b) = (recorder(&a), recorder(&b));

        batch(|| {
            a.dispatch(1);
            let inner = hold(&[&b]);
            b.dispatch(2);
            inner.release();
            assert!(calls_a.lock().is_empty());
            assert!(calls_b.lock().is_empty());
        });

        assert_eq!(*calls_a.lock(), vec![(1, 0)]);
        assert_eq!(*calls_b.lock(), vec![(2, 0)]);
    }

    #[test]
    fn dropping_releases() {
        let a = Signal::new(0);
        let calls = recorder(&a);
        {
            let _held = hold(&[&a]);
            a.dispatch(5);
        }
        assert_eq!(*calls.lock(), vec![(5, 0)]);
    }

    #[test]
    fn hold_while_returns_closure_result() {
        let a = Signal::new(0);
        let calls = recorder(&a);
        let result = hold_while(&[&a], || {
            a.dispatch(7);
            "done"
        });
        assert_eq!(result, "done");
        assert_eq!(*calls.lock(), vec![(7, 0)]);
    }

    #[test]
    fn overlapping_holds_wait_for_the_last_release() {
        let a = Signal::new(0);
        let calls = recorder(&a);

        let outer = hold(&[&a]);
        a.dispatch(1);
        let inner = hold(&[&a]);
        a.dispatch(2);

        inner.release();
        assert!(calls.lock().is_empty());

        a.dispatch(3);
        outer.release();
        assert_eq!(*calls.lock(), vec![(3, 0)]);
    }

    #[test]
    fn unwinding_drops_the_hold_without_notifying() {
        let a = Signal::new(0);
        let calls = recorder(&a);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = hold(&[&a]);
            a.dispatch(1);
            panic!("abandoned");
        }));
        assert!(result.is_err());
        assert!(calls.lock().is_empty());
        assert_eq!(a.previous(), 0);

        a.dispatch(2);
        assert_eq!(*calls.lock(), vec![(2, 1)]);
    }
}

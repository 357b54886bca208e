//! Merge Combinator
//!
//! A merged signal is a unit-valued event that fires based on which of its
//! sources fired:
//!
//! - AND (default): fires once every source has fired since the last time
//!   it fired, then starts over.
//! - OR (`individual: true`): fires every time any source fires.
//!
//! Merged signals are cached by their [`SignalSpace`](super::SignalSpace):
//! merging the same sources (in any order) with the same options returns
//! the same signal.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;

use super::signal::{AnySignal, Signal};
use super::space::SignalSpace;

/// Options for [`merge_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MergeOptions {
    /// Fire on every source firing instead of waiting for all of them.
    pub individual: bool,
}

impl MergeOptions {
    pub fn individual() -> Self {
        Self { individual: true }
    }
}

/// Which sources have fired since the last reset, one bit per source.
#[derive(Debug)]
struct FiredSet {
    words: SmallVec<[u64; 1]>,
    len: usize,
    marked: usize,
}

impl FiredSet {
    fn new(len: usize) -> Self {
        Self {
            words: SmallVec::from_elem(0, len.div_ceil(64)),
            len,
            marked: 0,
        }
    }

    /// Mark source `index`. Returns true, and resets, when every source is
    /// marked.
    fn mark(&mut self, index: usize) -> bool {
        let (word, bit) = (index / 64, 1u64 << (index % 64));
        if self.words[word] & bit == 0 {
            self.words[word] |= bit;
            self.marked += 1;
        }
        if self.marked == self.len {
            self.words.iter_mut().for_each(|w| *w = 0);
            self.marked = 0;
            return true;
        }
        false
    }
}

/// Merge `sources` with AND semantics, using the global signal space.
///
/// ```rust
/// use ripple_core::{merge, Signal};
///
/// let a = Signal::new(1);
/// let b = Signal::new("x".to_string());
/// let both = merge(&[&a, &b]);
/// assert_eq!(both, merge(&[&b, &a]));
/// ```
pub fn merge(sources: &[&dyn AnySignal]) -> Signal<()> {
    SignalSpace::global().merge(sources)
}

/// Merge `sources` with explicit options, using the global signal space.
pub fn merge_with(sources: &[&dyn AnySignal], options: MergeOptions) -> Signal<()> {
    SignalSpace::global().merge_with(sources, options)
}

/// Build an uncached merged signal over already deduplicated sources.
pub(crate) fn build(sources: &[&dyn AnySignal], options: MergeOptions) -> Signal<()> {
    let merged = Signal::new(());

    if options.individual {
        for source in sources {
            let target = merged.clone();
            source.on_fire(Arc::new(move || target.notify()));
        }
        return merged;
    }

    let fired = Arc::new(Mutex::new(FiredSet::new(sources.len())));
    for (index, source) in sources.iter().enumerate() {
        let target = merged.clone();
        let fired = Arc::clone(&fired);
        source.on_fire(Arc::new(move || {
            let complete = fired.lock().mark(index);
            if complete {
                target.notify();
            }
        }));
    }

    merged
}

//! Signal Space
//!
//! A signal space owns the structural caches shared by signals: today that
//! is the merge cache. The process-wide instance behind
//! [`SignalSpace::global`] serves the free functions; isolated spaces can
//! be created for code that wants its own cache lifetime (tests, plugins,
//! one space per document).
//!
//! # Cache keys
//!
//! A merge is keyed by the sorted ids of its deduplicated sources plus the
//! JSON serialisation of its options. Ids are plain counters, so the key
//! holds no reference to the sources, and the cached merged signal is held
//! weakly: a merge nobody references any more is rebuilt on next request.

use std::collections::HashSet;
use std::fmt;
use std::sync::{OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;

use super::merge::{self, MergeOptions};
use super::signal::{AnySignal, Signal, SignalId, SignalInner};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MergeKey {
    sources: SmallVec<[SignalId; 4]>,
    options: String,
}

impl MergeKey {
    fn new(sources: &[&dyn AnySignal], options: &MergeOptions) -> Self {
        let mut ids: SmallVec<[SignalId; 4]> = sources.iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        let options = serde_json::to_string(options).unwrap_or_else(|_| format!("{options:?}"));
        Self {
            sources: ids,
            options,
        }
    }
}

/// Owner of the merge cache.
pub struct SignalSpace {
    merges: DashMap<MergeKey, Weak<SignalInner<()>>>,
}

static GLOBAL: OnceLock<SignalSpace> = OnceLock::new();

impl SignalSpace {
    /// Create an isolated space with an empty cache.
    pub fn new() -> Self {
        Self {
            merges: DashMap::new(),
        }
    }

    /// The process-wide space.
    pub fn global() -> &'static SignalSpace {
        GLOBAL.get_or_init(SignalSpace::new)
    }

    /// Merge with AND semantics.
    pub fn merge(&self, sources: &[&dyn AnySignal]) -> Signal<()> {
        self.merge_with(sources, MergeOptions::default())
    }

    /// Merge with explicit options, reusing a cached merge when one exists
    /// for the same sources and options.
    pub fn merge_with(&self, sources: &[&dyn AnySignal], options: MergeOptions) -> Signal<()> {
        let mut seen = HashSet::new();
        let unique: SmallVec<[&dyn AnySignal; 4]> = sources
            .iter()
            .copied()
            .filter(|source| seen.insert(source.id()))
            .collect();

        if unique.is_empty() {
            return Signal::new(());
        }

        let key = MergeKey::new(&unique, &options);
        self.prune();

        match self.merges.entry(key) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = Signal::upgrade(entry.get()) {
                    tracing::debug!(signal = %existing.id(), "merge cache hit");
                    return existing;
                }
                let merged = merge::build(&unique, options);
                entry.insert(merged.downgrade());
                merged
            }
            Entry::Vacant(entry) => {
                let merged = merge::build(&unique, options);
                tracing::debug!(
                    signal = %merged.id(),
                    sources = unique.len(),
                    individual = options.individual,
                    "merged signal built"
                );
                entry.insert(merged.downgrade());
                merged
            }
        }
    }

    /// Number of cached merges whose signal is still alive.
    pub fn cached_merges(&self) -> usize {
        self.merges
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    fn prune(&self) {
        self.merges.retain(|_, merged| merged.strong_count() > 0);
    }
}

impl Default for SignalSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSpace")
            .field("cached_merges", &self.cached_merges())
            .finish()
    }
}

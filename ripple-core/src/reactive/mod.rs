//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived signals,
//! merged signals, batching and holds.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a cell holding a current value and the value it held
//! before the last committed change. Dispatching a value stores it and
//! notifies every listener with `(new, old, extra)`. An interceptor may
//! transform or veto incoming values before they are stored.
//!
//! ## Listeners
//!
//! Listeners are registered with [`Signal::hook`] or [`Signal::hook_with`].
//! [`HookOptions`] control ordering: listeners can be pinned to the front or
//! back of the list, or placed relative to another listener by string id.
//!
//! ## Derived Signals
//!
//! A [`Derived`] signal holds `compute(sources)` and recomputes whenever a
//! source fires. Recomputation is ordered by height, so a derived signal
//! never observes a half-updated graph.
//!
//! ## Merged Signals
//!
//! [`merge`] turns a set of sources into a unit-valued event firing once all
//! of them (or, with [`MergeOptions::individual`], any of them) have fired.
//! Merges are cached per [`SignalSpace`].
//!
//! ## Batching and Holds
//!
//! Inside [`batch()`] every notification is deferred until the outermost
//! batch exits, and each listener is called once with the final value.
//! [`hold`] defers a chosen set of signals until the hold is released.
//!
//! # Implementation Notes
//!
//! The batching ledger is thread-local. Signals themselves are `Send + Sync`
//! and guard their state with `parking_lot` locks; no lock is held while a
//! listener runs, so listeners may freely read and dispatch.

pub mod batch;
mod derive;
mod hold;
mod listener;
mod merge;
mod signal;
mod space;

pub use batch::{batch, is_batching, BatchConfig};
pub use derive::{derive, derive_dynamic, DeriveArg, Derived, DynValues, Readable, Sources};
pub use hold::{hold, hold_while, Held};
pub use listener::{Extra, HookOptions, ListenerId, Subscription};
pub use merge::{merge, merge_with, MergeOptions};
pub use signal::{AnySignal, Dispatch, Signal, SignalId};
pub use space::SignalSpace;

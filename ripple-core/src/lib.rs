//! Ripple Core
//!
//! This crate provides a small push-based reactive state library. It
//! implements:
//!
//! - Signals: observable cells with a current and a previous value
//! - Ordered listeners with before/after constraints and one-shot hooks
//! - Derived signals, recomputed glitch-free in height order
//! - Merged signals firing when all (or any) of their sources fire
//! - Batching and holds, coalescing notifications to one per listener
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: signals, listeners, derivation, merging, batching
//! - `error`: errors raised while assembling derivations at runtime
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use ripple_core::{batch, derive, Signal};
//!
//! let price = Signal::new(10);
//! let quantity = Signal::new(2);
//! let total = derive((price.clone(), quantity.clone()), |(p, q)| p * q);
//!
//! let updates = Arc::new(AtomicUsize::new(0));
//! let seen = updates.clone();
//! total.hook(move |_, _, _| {
//!     seen.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! batch(|| {
//!     price.dispatch(12);
//!     quantity.dispatch(3);
//! });
//!
//! assert_eq!(total.get(), 36);
//! assert_eq!(updates.load(Ordering::SeqCst), 1);
//! ```

mod error;
pub mod reactive;

pub use error::{ArgumentKind, Result, SignalError};
pub use reactive::{
    batch, derive, derive_dynamic, hold, hold_while, merge, merge_with, AnySignal, BatchConfig,
    DeriveArg, Derived, Dispatch, DynValues, Extra, Held, HookOptions, ListenerId, MergeOptions,
    Readable, Signal, SignalId, SignalSpace, Sources, Subscription,
};

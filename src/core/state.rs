//! # State store: the single mutable cell of a machine.
//!
//! The current state lives behind an [`ArcSwap`] together with an `open` flag.
//! Every write is a compare-and-swap over the pair, so the "is the state channel
//! still open?" check and the write itself are one atomic step: a write racing
//! with [`freeze`](StateStore::freeze) either lands before it or fails.
//!
//! ```text
//! update(f):
//!   loop {
//!     cur = slot.load()
//!     if !cur.open → Err(StateClosed)
//!     next = f(&cur.value)
//!     if slot.compare_and_swap(cur, next) succeeded → publish next, return
//!   }
//! ```
//!
//! `f` may run more than once under contention and must be free of side effects.
//! Observers read the latest value through a `tokio::sync::watch` channel.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::error::MachineError;

struct Slot<S> {
    value: S,
    open: bool,
}

/// Atomic state cell with change broadcast.
pub(crate) struct StateStore<S> {
    slot: ArcSwap<Slot<S>>,
    watch: watch::Sender<S>,
}

impl<S: Clone + Send + Sync + 'static> StateStore<S> {
    pub(crate) fn new(initial: S) -> Self {
        let (watch, _) = watch::channel(initial.clone());
        Self {
            slot: ArcSwap::from_pointee(Slot {
                value: initial,
                open: true,
            }),
            watch,
        }
    }

    /// Current snapshot. Always readable, also after the store was frozen.
    pub(crate) fn get(&self) -> S {
        self.slot.load().value.clone()
    }

    /// True until [`freeze`](Self::freeze) is called.
    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.slot.load().open
    }

    /// Replaces the state. Returns the previous value.
    pub(crate) fn set(&self, value: S) -> Result<S, MachineError> {
        self.update(|_| value.clone()).map(|(old, _)| old)
    }

    /// Closes the state channel; later writes fail with [`MachineError::StateClosed`].
    pub(crate) fn freeze(&self) {
        self.slot.rcu(|cur| Slot {
            value: cur.value.clone(),
            open: false,
        });
    }

    /// Subscribes to future values.
    pub(crate) fn subscribe(&self) -> watch::Receiver<S> {
        self.watch.subscribe()
    }

    /// Applies `f` atomically. Returns `(previous, new)` of the write that landed.
    pub(crate) fn update(&self, f: impl Fn(&S) -> S) -> Result<(S, S), MachineError> {
        loop {
            let cur = self.slot.load_full();
            if !cur.open {
                return Err(MachineError::StateClosed);
            }
            let next = Arc::new(Slot {
                value: f(&cur.value),
                open: true,
            });
            let prev = self.slot.compare_and_swap(&cur, Arc::clone(&next));
            if Arc::ptr_eq(&*prev, &cur) {
                self.watch.send_replace(next.value.clone());
                return Ok((cur.value.clone(), next.value.clone()));
            }
        }
    }
}

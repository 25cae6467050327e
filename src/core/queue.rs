//! # Admission queue shared by inputs, events and notifications.
//!
//! [`AdmissionQueue`] is a bounded `tokio::sync::mpsc` channel with three extras:
//! - a **pending counter** (admitted but not yet fully processed items) so that
//!   [`flush`](AdmissionQueue::flush) can wait for the consumer to finish,
//! - a **graceful close** that stops admission while buffered items still drain,
//! - a **forced close** that stops the consumer immediately.
//!
//! ```text
//! enqueue(item) ──► pending += 1 ──► [bounded mpsc] ──► QueueReceiver::recv() ──► Delivery
//!                                                                                  │
//!                                           pending -= 1 ◄── drop(Delivery) ◄──────┘
//! ```
//!
//! ## Rules
//! - A [`Delivery`] must be held until the item is completely processed.
//! - `close()` is idempotent; items already admitted are still delivered.
//! - `force_close()` makes `recv()` return `None` and `flush()` return at once.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Reason an item was not admitted. The item is handed back to the caller.
#[derive(Debug)]
pub enum Rejected<T> {
    /// The queue is at capacity (non-blocking admission only).
    Full(T),
    /// The queue no longer admits items.
    Closed(T),
}

impl<T> Rejected<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Rejected::Full(item) | Rejected::Closed(item) => item,
        }
    }

    /// True if the queue was closed (as opposed to full).
    pub fn is_closed(&self) -> bool {
        matches!(self, Rejected::Closed(_))
    }
}

/// Decrements the pending counter on drop.
struct PendingGuard {
    pending: Arc<watch::Sender<usize>>,
}

impl PendingGuard {
    fn acquire(pending: &Arc<watch::Sender<usize>>) -> Self {
        pending.send_modify(|n| *n += 1);
        Self {
            pending: Arc::clone(pending),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct Tracked<T> {
    item: T,
    guard: PendingGuard,
}

/// One received item. Holding it keeps the item counted as pending.
pub struct Delivery<T> {
    item: T,
    guard: PendingGuard,
}

impl<T> Delivery<T> {
    /// Borrows the delivered item.
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Splits the delivery into the item and its completion marker.
    ///
    /// The item stays pending until the returned [`Completion`] is dropped.
    pub fn into_parts(self) -> (T, Completion) {
        (self.item, Completion(self.guard))
    }
}

/// Completion marker of a [`Delivery`]; dropping it marks the item processed.
pub struct Completion(#[allow(dead_code)] PendingGuard);

/// Producer side of a bounded admission queue.
pub struct AdmissionQueue<T> {
    name: &'static str,
    tx: Mutex<Option<mpsc::Sender<Tracked<T>>>>,
    pending: Arc<watch::Sender<usize>>,
    force: CancellationToken,
}

/// Consumer side of a bounded admission queue.
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<Tracked<T>>,
    force: CancellationToken,
}

/// Creates a queue named `name` holding at most `capacity` buffered items (min 1).
pub fn channel<T: Send>(name: &'static str, capacity: usize) -> (AdmissionQueue<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (pending, _) = watch::channel(0usize);
    let force = CancellationToken::new();
    (
        AdmissionQueue {
            name,
            tx: Mutex::new(Some(tx)),
            pending: Arc::new(pending),
            force: force.clone(),
        },
        QueueReceiver { rx, force },
    )
}

impl<T: Send> AdmissionQueue<T> {
    /// Queue name used in errors and logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn sender(&self) -> Option<mpsc::Sender<Tracked<T>>> {
        if self.force.is_cancelled() {
            return None;
        }
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Admits `item`, waiting for capacity if the queue is full (backpressure).
    pub async fn enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let Some(tx) = self.sender() else {
            return Err(Rejected::Closed(item));
        };
        let permit = tokio::select! {
            biased;
            _ = self.force.cancelled() => return Err(Rejected::Closed(item)),
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(Rejected::Closed(item)),
            },
        };
        permit.send(Tracked {
            item,
            guard: PendingGuard::acquire(&self.pending),
        });
        Ok(())
    }

    /// Admits `item` only if there is free capacity right now.
    pub fn try_enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let Some(tx) = self.sender() else {
            return Err(Rejected::Closed(item));
        };
        match tx.try_reserve() {
            Ok(permit) => {
                permit.send(Tracked {
                    item,
                    guard: PendingGuard::acquire(&self.pending),
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => Err(Rejected::Full(item)),
            Err(mpsc::error::TrySendError::Closed(())) => Err(Rejected::Closed(item)),
        }
    }

    /// Stops admitting new items. Already admitted items are still delivered.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Stops admission and makes the consumer stop immediately.
    pub fn force_close(&self) {
        self.force.cancel();
        self.close();
    }

    /// True once `close()` or `force_close()` was called.
    pub fn is_closed(&self) -> bool {
        self.force.is_cancelled()
            || self
                .tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .is_none()
    }

    /// Number of admitted items not yet fully processed.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Waits until every admitted item has been fully processed.
    ///
    /// Returns immediately after `force_close()`.
    pub async fn flush(&self) {
        let mut rx = self.pending.subscribe();
        tokio::select! {
            _ = async { let _ = rx.wait_for(|n| *n == 0).await; } => {}
            _ = self.force.cancelled() => {}
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Receives the next item.
    ///
    /// Returns `None` once the queue is closed and drained, or force-closed.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        tokio::select! {
            biased;
            _ = self.force.cancelled() => None,
            next = self.rx.recv() => next.map(|t| Delivery { item: t.item, guard: t.guard }),
        }
    }
}

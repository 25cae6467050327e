//! # Notification hub: buffered ingestion feeding a broadcast channel.
//!
//! ```text
//! Publishers (many):                      Consumers (many):
//!   coordinator ──┐                          ┌──► interceptor worker 1
//!   strategy    ──┼─► [ingestion queue] ─► pump ─► broadcast ──┼──► interceptor worker 2
//!   side jobs   ──┤     (bounded mpsc)                         └──► external subscribers
//!   events      ──┘
//! ```
//!
//! ## Rules
//! - [`notify`](Hub::notify) waits for queue capacity; [`notify_immediate`](Hub::notify_immediate)
//!   never waits and drops the notification on a full or closed queue.
//! - The pump forwards in ingestion order, so every subscriber sees the same relative order.
//! - Each subscriber holds an independent cursor; a slow one lags (and skips) without
//!   blocking the pump or other subscribers.
//! - Subscribers must attach before [`start_pump`](Hub::start_pump) to observe every notification.
//! - When the pump exits, the broadcast sender is released and subscribers observe `Closed`
//!   after draining what they already have.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::queue::{self, AdmissionQueue, QueueReceiver};
use crate::core::spawn_on;

use super::notification::{Notification, NotificationKind};

pub(crate) struct Hub<I, E, S> {
    machine: Arc<str>,
    queue: AdmissionQueue<Notification<I, E, S>>,
    rx: Mutex<Option<QueueReceiver<Notification<I, E, S>>>>,
    tx: Mutex<Option<broadcast::Sender<Notification<I, E, S>>>>,
}

impl<I, E, S> Hub<I, E, S>
where
    I: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(machine: Arc<str>, capacity: usize, broadcast_capacity: usize) -> Self {
        let (queue, rx) = queue::channel("notifications", capacity);
        let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            machine,
            queue,
            rx: Mutex::new(Some(rx)),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Creates a new independent cursor, or `None` once the pump has exited.
    pub(crate) fn subscribe(&self) -> Option<broadcast::Receiver<Notification<I, E, S>>> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Queues a notification, waiting for capacity.
    pub(crate) async fn notify(&self, kind: NotificationKind<I, E, S>) {
        let n = Notification::new(Arc::clone(&self.machine), kind);
        if let Err(rejected) = self.queue.enqueue(n).await {
            tracing::debug!(
                machine = %self.machine,
                kind = rejected.into_inner().kind.as_label(),
                "notification dropped: queue closed"
            );
        }
    }

    /// Queues a notification without waiting; drops it on a full or closed queue.
    pub(crate) fn notify_immediate(&self, kind: NotificationKind<I, E, S>) {
        let n = Notification::new(Arc::clone(&self.machine), kind);
        if let Err(rejected) = self.queue.try_enqueue(n) {
            let reason = if rejected.is_closed() { "closed" } else { "full" };
            tracing::debug!(
                machine = %self.machine,
                kind = rejected.into_inner().kind.as_label(),
                reason,
                "notification dropped"
            );
        }
    }

    /// Starts forwarding queued notifications to the broadcast channel.
    ///
    /// Returns `None` if the pump was already started.
    pub(crate) fn start_pump(
        self: &Arc<Self>,
        runtime: Option<&tokio::runtime::Handle>,
    ) -> Option<JoinHandle<()>> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let tx = self.subscribe_sender()?;
        let hub = Arc::clone(self);

        Some(spawn_on(runtime, async move {
            while let Some(delivery) = rx.recv().await {
                let _ = tx.send(delivery.item().clone());
            }
            drop(tx);
            hub.release_broadcast();
        }))
    }

    fn subscribe_sender(&self) -> Option<broadcast::Sender<Notification<I, E, S>>> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn release_broadcast(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// Stops ingestion; queued notifications are still forwarded.
    pub(crate) fn close(&self) {
        self.queue.close();
    }

    /// Waits until every queued notification was forwarded.
    pub(crate) async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Closes ingestion and lets the pump drain, then waits for it.
    pub(crate) async fn close_and_flush(&self) {
        self.close();
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;

    type TestHub = Hub<u32, (), ()>;

    #[tokio::test]
    async fn test_subscribers_see_same_order() {
        let hub = Arc::new(TestHub::new("m".into(), 16, 16));
        let mut a = hub.subscribe().unwrap();
        let mut b = hub.subscribe().unwrap();
        hub.start_pump(None).unwrap();

        for i in 0..5 {
            hub.notify(NotificationKind::InputQueued(i)).await;
        }
        hub.close_and_flush().await;

        for i in 0..5 {
            assert_eq!(a.recv().await.unwrap().kind.input(), Some(&i));
            assert_eq!(b.recv().await.unwrap().kind.input(), Some(&i));
        }
    }

    #[tokio::test]
    async fn test_notifications_before_pump_are_buffered() {
        let hub = Arc::new(TestHub::new("m".into(), 16, 16));
        let mut rx = hub.subscribe().unwrap();
        hub.notify(NotificationKind::StatusChanged(Status::Running)).await;
        hub.start_pump(None).unwrap();

        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind.as_label(), "status_changed");
    }

    #[tokio::test]
    async fn test_immediate_drops_when_full() {
        let hub = Arc::new(TestHub::new("m".into(), 1, 16));
        hub.notify_immediate(NotificationKind::InputQueued(1));
        hub.notify_immediate(NotificationKind::InputQueued(2));
        assert_eq!(hub.queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_pump_exit_closes_subscribers() {
        let hub = Arc::new(TestHub::new("m".into(), 4, 4));
        let mut rx = hub.subscribe().unwrap();
        let pump = hub.start_pump(None).unwrap();
        assert!(hub.start_pump(None).is_none());

        hub.notify(NotificationKind::InputQueued(9)).await;
        hub.close_and_flush().await;
        pump.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind.input(), Some(&9));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(hub.subscribe().is_none());
    }
}

//! # Event pipeline: queue plus a single dispatch loop.
//!
//! ```text
//! post_event(e) ──► EventQueued ──► [event queue] ──► dispatch loop (attached handler)
//!                                                       ├─► EventEmitted(e)
//!                                                       ├─► handler.handle(scope, e)
//!                                                       │     ├─ Ok          ─► EventHandledSuccessfully
//!                                                       │     ├─ Err / panic ─► EventHandlerError (loop continues)
//!                                                       │     └─ cancelled   ─► swallowed
//!                                                       └─► next event
//! ```
//!
//! ## Rules
//! - One handler at a time; attaching a second fails with [`MachineError::EventHandlerAttached`].
//! - Each event is handed to exactly one handler attempt.
//! - Detaching parks the queue receiver so a new handler can pick up where the old one stopped.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::machine::Core;
use crate::core::queue::{self, AdmissionQueue, QueueReceiver};
use crate::core::{EventHandlerScope, Message, Resource, spawn_on};
use crate::error::{HandlerError, MachineError};
use crate::handlers::EventHandlerRef;
use crate::notifications::NotificationKind;

pub(crate) struct EventPipeline<E> {
    queue: AdmissionQueue<E>,
    rx: Arc<Mutex<Option<QueueReceiver<E>>>>,
}

impl<E: Message> EventPipeline<E> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (queue, rx) = queue::channel("events", capacity);
        Self {
            queue,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    pub(crate) fn queue(&self) -> &AdmissionQueue<E> {
        &self.queue
    }

    /// Queues `event` for dispatch. Waits while the queue is full.
    pub(crate) async fn post<I: Message, S: Message>(
        &self,
        core: &Core<I, E, S>,
        event: E,
    ) -> Result<(), MachineError> {
        if !core.status.is_open(Resource::Events) || self.queue.is_closed() {
            return Err(MachineError::QueueClosed {
                queue: self.queue.name(),
            });
        }
        core.hub
            .notify(NotificationKind::EventQueued(event.clone()))
            .await;
        self.queue.enqueue(event).await.map_err(|rejected| {
            tracing::debug!(machine = %core.name, "event refused after it was queued");
            if rejected.is_closed() {
                MachineError::QueueClosed {
                    queue: self.queue.name(),
                }
            } else {
                MachineError::QueueFull {
                    queue: self.queue.name(),
                }
            }
        })
    }

    /// Starts dispatching to `handler`.
    pub(crate) fn attach<I: Message, S: Message>(
        &self,
        core: &Arc<Core<I, E, S>>,
        handler: EventHandlerRef<I, E, S>,
    ) -> Result<EventHandlerAttachment, MachineError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(MachineError::EventHandlerAttached)?;

        let token = core.root.child_token();
        let core = Arc::clone(core);
        let slot = Arc::clone(&self.rx);
        let rt = core.cfg.dispatchers.events.clone();

        let join = spawn_on(
            rt.as_ref(),
            dispatch(core, handler, rx, slot, token.clone()),
        );
        Ok(EventHandlerAttachment { token, join })
    }
}

async fn dispatch<I: Message, E: Message, S: Message>(
    core: Arc<Core<I, E, S>>,
    handler: EventHandlerRef<I, E, S>,
    mut rx: QueueReceiver<E>,
    slot: Arc<Mutex<Option<QueueReceiver<E>>>>,
    token: CancellationToken,
) {
    core.hub
        .notify(NotificationKind::EventProcessingStarted)
        .await;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        let (event, _done) = delivery.into_parts();
        core.hub
            .notify(NotificationKind::EventEmitted(event.clone()))
            .await;

        let scope = EventHandlerScope::new(Arc::clone(&core));
        let fut = std::panic::AssertUnwindSafe(handler.handle(scope, event.clone())).catch_unwind();
        let res = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = fut => res,
        };

        let kind = match res {
            Ok(Ok(())) => NotificationKind::EventHandledSuccessfully(event),
            Ok(Err(HandlerError::Cancelled)) => continue,
            Ok(Err(error)) => NotificationKind::EventHandlerError { event, error },
            Err(panic) => NotificationKind::EventHandlerError {
                event,
                error: HandlerError::from_panic(panic),
            },
        };
        core.hub.notify(kind).await;
    }

    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(rx);
    core.hub
        .notify(NotificationKind::EventProcessingStopped)
        .await;
}

/// Handle to an attached event handler.
///
/// Dropping it leaves the handler attached until the machine stops.
#[derive(Debug)]
pub struct EventHandlerAttachment {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl EventHandlerAttachment {
    /// Stops dispatching and waits for the loop to exit.
    ///
    /// An event being handled at that moment is abandoned without a terminal notification.
    pub async fn detach(self) {
        self.token.cancel();
        let _ = self.join.await;
    }

    /// True once the dispatch loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

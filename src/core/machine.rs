//! # Machine: the coordinator of one MVI state machine.
//!
//! [`Machine`] owns the lifecycle [`Status`], the state cell and every queue, starts
//! the components in dependency order, and runs the shutdown protocols.
//!
//! ## Startup
//! ```text
//! start()
//!   ├─► status: NotStarted → Running
//!   ├─► spawn input strategy loop       (main queue consumer)
//!   ├─► spawn side job request loop
//!   ├─► subscribe + spawn interceptor workers
//!   ├─► start notification pump         (after every interceptor subscribed)
//!   ├─► StatusChanged(Running), StateChanged(initial)
//!   ├─► attach builder-provided event handler (if any)
//!   └─► spawn teardown watcher          (root token cancelled → teardown)
//! ```
//!
//! ## Graceful shutdown
//! The request travels through the main queue like any input, so everything queued
//! before it has been admitted. Each phase starts after the previous one completed:
//! ```text
//! ShutDownGracefully(grace)
//!   1. status → ShuttingDown{all open}                     StatusChanged
//!   2. close side jobs; wait ≤ grace, then force-cancel    StatusChanged ×2
//!   3. close main queue; drain in-flight inputs            StatusChanged
//!   4. close events; drain (≤ grace, then force)           StatusChanged
//!   5. status → Cleared, freeze state                      StatusChanged(Cleared)
//!      close + drain notification queue, join interceptors (≤ grace)
//!   6. complete the caller's deferred
//!   7. cancel the root token
//! ```
//!
//! ## Ungraceful teardown
//! Cancelling the root token ([`Machine::cancel`], or the parent token) runs:
//! mark Cleared → freeze state → force-cancel side jobs → `StatusChanged(Cleared)` →
//! force-close input and event queues → close the notification queue.
//!
//! ## Rules
//! - `StatusChanged(Cleared)` is emitted exactly once, whichever path gets there first.
//! - Teardown after a completed graceful shutdown is a no-op.
//! - Anything escaping the per-unit catch boundaries is reported as `UnhandledError`.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::queue::{self, AdmissionQueue, QueueReceiver};
use crate::core::runner::{Deferred, InputRunner, Queued, QueuedKind};
use crate::core::{
    MachineBuilder, MachineConfig, Message, Resource, StateStore, Status, StatusCell, spawn_on,
};
use crate::error::{HandlerError, MachineError};
use crate::events::{EventHandlerAttachment, EventPipeline};
use crate::handlers::{EventHandler, EventHandlerRef, InputHandler, InputHandlerRef};
use crate::interceptors::{InterceptorRef, InterceptorSet};
use crate::notifications::{Hub, Notification, NotificationKind, SideJobRef};
use crate::sidejobs::{Registry, SideJobBody};
use crate::strategies::InputStrategy;

/// Shared internals of one machine.
pub(crate) struct Core<I, E, S> {
    pub(crate) name: Arc<str>,
    pub(crate) cfg: MachineConfig,
    pub(crate) status: StatusCell,
    pub(crate) state: StateStore<S>,
    pub(crate) hub: Arc<Hub<I, E, S>>,
    pub(crate) inputs: AdmissionQueue<Queued<I, E, S>>,
    input_rx: Mutex<Option<QueueReceiver<Queued<I, E, S>>>>,
    pub(crate) strategy: Arc<dyn InputStrategy<I, E, S>>,
    pub(crate) handler: InputHandlerRef<I, E, S>,
    pub(crate) side_jobs: Registry<I, E, S>,
    pub(crate) events: EventPipeline<E>,
    interceptors: InterceptorSet<I, E, S>,
    event_handler: Mutex<Option<EventHandlerRef<I, E, S>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) root: CancellationToken,
    cleared: CancellationToken,
}

pub(crate) struct CoreParts<I, E, S> {
    pub(crate) cfg: MachineConfig,
    pub(crate) initial: S,
    pub(crate) strategy: Arc<dyn InputStrategy<I, E, S>>,
    pub(crate) handler: InputHandlerRef<I, E, S>,
    pub(crate) interceptors: Vec<InterceptorRef<I, E, S>>,
    pub(crate) event_handler: Option<EventHandlerRef<I, E, S>>,
    pub(crate) parent: Option<CancellationToken>,
}

impl<I: Message, E: Message, S: Message> Core<I, E, S> {
    pub(crate) fn new(parts: CoreParts<I, E, S>) -> Self {
        let CoreParts {
            cfg,
            initial,
            strategy,
            handler,
            interceptors,
            event_handler,
            parent,
        } = parts;

        let name = Arc::clone(&cfg.name);
        let root = parent.map_or_else(CancellationToken::new, |p| p.child_token());
        let (inputs, input_rx) = queue::channel("inputs", cfg.input_capacity_clamped());
        let hub = Arc::new(Hub::new(
            Arc::clone(&name),
            cfg.notification_capacity_clamped(),
            cfg.broadcast_capacity_clamped(),
        ));

        Self {
            status: StatusCell::new(),
            state: StateStore::new(initial),
            hub,
            inputs,
            input_rx: Mutex::new(Some(input_rx)),
            strategy,
            handler,
            side_jobs: Registry::new(&root),
            events: EventPipeline::new(cfg.event_capacity_clamped()),
            interceptors: InterceptorSet::new(interceptors),
            event_handler: Mutex::new(event_handler),
            workers: Mutex::new(Vec::new()),
            cleared: CancellationToken::new(),
            root,
            name,
            cfg,
        }
    }

    /// Spawns `fut`, reporting a panic escaping it as `UnhandledError`.
    fn spawn_supervised<F>(self: &Arc<Self>, rt: Option<&Handle>, task: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let core = Arc::clone(self);
        spawn_on(rt, async move {
            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                let error = HandlerError::from_panic(panic);
                tracing::error!(machine = %core.name, task, %error, "unhandled error");
                core.hub
                    .notify_immediate(NotificationKind::UnhandledError { error });
            }
        })
    }

    async fn start(self: &Arc<Self>) -> Result<(), MachineError> {
        let status = self.status.start()?;

        let rx = self
            .input_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(MachineError::IllegalTransition {
                op: "start",
                status: Status::Running.as_label(),
            })?;
        let strategy = Arc::clone(&self.strategy);
        let runner = InputRunner::new(Arc::clone(self));
        self.spawn_supervised(
            self.cfg.dispatchers.inputs.as_ref(),
            "input_strategy",
            async move { strategy.process(rx, runner).await },
        );

        if let Some(requests) = self.side_jobs.request_loop(self) {
            self.spawn_supervised(
                self.cfg.dispatchers.side_jobs.as_ref(),
                "side_job_requests",
                requests,
            );
        }

        let workers = self.interceptors.spawn_workers(self);
        *self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = workers;

        let _ = self
            .hub
            .start_pump(self.cfg.dispatchers.interceptors.as_ref());

        self.hub.notify(NotificationKind::StatusChanged(status)).await;
        self.hub
            .notify(NotificationKind::StateChanged(self.state.get()))
            .await;

        let handler = self
            .event_handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            let _ = self.events.attach(self, handler)?;
        }

        let core = Arc::clone(self);
        self.spawn_supervised(
            self.cfg.dispatchers.inputs.as_ref(),
            "teardown_watcher",
            async move {
                core.root.cancelled().await;
                core.teardown().await;
            },
        );

        tracing::debug!(machine = %self.name, strategy = self.strategy.name(), "machine started");
        Ok(())
    }

    pub(crate) async fn post_input(&self, input: I, deferred: Option<Deferred>) -> Result<(), MachineError> {
        if !self.status.is_open(Resource::MainQueue) {
            self.hub
                .notify_immediate(NotificationKind::InputDropped(input));
            return Err(MachineError::QueueClosed {
                queue: self.inputs.name(),
            });
        }
        self.hub
            .notify(NotificationKind::InputQueued(input.clone()))
            .await;
        let item = Queued::new(QueuedKind::HandleInput(input), deferred);
        match self.inputs.enqueue(item).await {
            Ok(()) => Ok(()),
            Err(rejected) => Err(self.dropped(rejected).await),
        }
    }

    pub(crate) fn try_post_input(&self, input: I) -> Result<(), MachineError> {
        if !self.status.is_open(Resource::MainQueue) {
            self.hub
                .notify_immediate(NotificationKind::InputDropped(input));
            return Err(MachineError::QueueClosed {
                queue: self.inputs.name(),
            });
        }
        self.hub
            .notify_immediate(NotificationKind::InputQueued(input.clone()));
        let item = Queued::new(QueuedKind::HandleInput(input), None);
        self.inputs.try_enqueue(item).map_err(|rejected| {
            let err = if rejected.is_closed() {
                MachineError::QueueClosed {
                    queue: self.inputs.name(),
                }
            } else {
                MachineError::QueueFull {
                    queue: self.inputs.name(),
                }
            };
            if let QueuedKind::HandleInput(input) = rejected.into_inner().kind {
                self.hub
                    .notify_immediate(NotificationKind::InputDropped(input));
            }
            err
        })
    }

    async fn dropped(&self, rejected: queue::Rejected<Queued<I, E, S>>) -> MachineError {
        let err = if rejected.is_closed() {
            MachineError::QueueClosed {
                queue: self.inputs.name(),
            }
        } else {
            MachineError::QueueFull {
                queue: self.inputs.name(),
            }
        };
        if let QueuedKind::HandleInput(input) = rejected.into_inner().kind {
            self.hub.notify(NotificationKind::InputDropped(input)).await;
        }
        err
    }

    pub(crate) async fn post_restore(&self, state: S, deferred: Option<Deferred>) -> Result<(), MachineError> {
        if !self.status.is_open(Resource::MainQueue) {
            return Err(MachineError::QueueClosed {
                queue: self.inputs.name(),
            });
        }
        self.inputs
            .enqueue(Queued::new(QueuedKind::RestoreState(state), deferred))
            .await
            .map_err(|_| MachineError::QueueClosed {
                queue: self.inputs.name(),
            })
    }

    pub(crate) async fn post_event(&self, event: E) -> Result<(), MachineError> {
        self.events.post(self, event).await
    }

    pub(crate) async fn start_side_job(
        &self,
        key: Arc<str>,
        body: SideJobBody<I, E, S>,
    ) -> Result<SideJobRef, MachineError> {
        if !self.status.is_open(Resource::SideJobs) {
            return Err(MachineError::SideJobsClosed);
        }
        self.side_jobs.request_start(self, key, body).await
    }

    pub(crate) async fn cancel_side_job(&self, key: Arc<str>) -> Result<(), MachineError> {
        if !self.status.is_open(Resource::SideJobCancellation) {
            return Err(MachineError::SideJobsClosed);
        }
        self.side_jobs.request_cancel(key).await;
        Ok(())
    }

    /// Runs the graceful shutdown sequence on its own task.
    pub(crate) fn spawn_shutdown(self: Arc<Self>, grace: Duration, deferred: Option<Deferred>) {
        let core = Arc::clone(&self);
        self.spawn_supervised(None, "graceful_shutdown", async move {
            core.shut_down(grace).await;
            if let Some(tx) = deferred {
                let _ = tx.send(());
            }
            core.root.cancel();
        });
    }

    async fn close_resource(&self, resource: Resource) {
        let status = self.status.close(resource);
        if matches!(status, Status::ShuttingDown { .. }) {
            self.hub.notify(NotificationKind::StatusChanged(status)).await;
        }
    }

    async fn shut_down(&self, grace: Duration) {
        let status = match self.status.begin_shutdown() {
            Ok(status) => status,
            Err(_) => {
                // Another request or teardown got there first.
                self.cleared.cancelled().await;
                return;
            }
        };
        tracing::debug!(machine = %self.name, grace_ms = grace.as_millis() as u64, "graceful shutdown started");
        self.hub.notify(NotificationKind::StatusChanged(status)).await;

        self.close_resource(Resource::SideJobs).await;
        self.side_jobs.shut_down(&self.name, grace).await;
        self.close_resource(Resource::SideJobCancellation).await;

        self.close_resource(Resource::MainQueue).await;
        self.inputs.close();
        self.inputs.flush().await;

        self.close_resource(Resource::Events).await;
        let events = self.events.queue();
        events.close();
        if timeout(grace, events.flush()).await.is_err() {
            tracing::warn!(
                machine = %self.name,
                pending = events.pending(),
                "events not drained within grace period (is an event handler attached?)"
            );
            events.force_close();
        }

        let first = self.status.try_clear().unwrap_or(false);
        self.state.freeze();
        if first {
            self.hub
                .notify(NotificationKind::StatusChanged(Status::Cleared))
                .await;
        }
        self.hub.close_and_flush().await;
        self.join_interceptors(grace).await;
        self.cleared.cancel();
        tracing::debug!(machine = %self.name, "graceful shutdown complete");
    }

    async fn join_interceptors(&self, grace: Duration) {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if timeout(grace, futures::future::join_all(workers))
            .await
            .is_err()
        {
            tracing::warn!(machine = %self.name, "interceptors did not finish within grace period");
        }
    }

    /// Compressed cleanup after the root token was cancelled. Idempotent.
    async fn teardown(&self) {
        let first = self.status.try_clear().unwrap_or(false);
        self.state.freeze();
        self.side_jobs.force_cancel();
        if first {
            tracing::debug!(machine = %self.name, "machine torn down");
            self.hub
                .notify(NotificationKind::StatusChanged(Status::Cleared))
                .await;
        }
        self.inputs.force_close();
        self.events.queue().force_close();
        self.hub.close();
        self.cleared.cancel();
    }
}

/// Handle to a running (or not yet started) state machine.
///
/// Cheap to clone; all clones drive the same machine.
pub struct Machine<I, E, S> {
    core: Arc<Core<I, E, S>>,
}

impl<I, E, S> Clone for Machine<I, E, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<I: Message, E: Message, S: Message> Machine<I, E, S> {
    /// Starts building a machine with `initial` state and the input `handler`.
    pub fn builder<H>(initial: S, handler: H) -> MachineBuilder<I, E, S>
    where
        H: InputHandler<I, E, S>,
    {
        MachineBuilder::new(initial, handler)
    }

    pub(crate) fn from_core(core: Core<I, E, S>) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    /// Machine name (from [`MachineConfig::name`]).
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        self.core.status.get()
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> S {
        self.core.state.get()
    }

    /// Observer of the state: current value plus a stream of future values.
    pub fn observe_states(&self) -> StateObserver<S> {
        StateObserver {
            rx: self.core.state.subscribe(),
            cleared: self.core.cleared.clone(),
        }
    }

    /// Starts the machine. Fails unless the machine was never started.
    pub async fn start(&self) -> Result<(), MachineError> {
        self.core.start().await
    }

    /// Queues `input`, waiting while the main queue is full.
    ///
    /// A refused input is also reported as `InputDropped`.
    pub async fn send(&self, input: I) -> Result<(), MachineError> {
        self.core.post_input(input, None).await
    }

    /// Queues `input` only if the main queue has room right now.
    pub fn try_send(&self, input: I) -> Result<(), MachineError> {
        self.core.try_post_input(input)
    }

    /// Queues `input` and waits until it reached a terminal notification.
    pub async fn send_and_await(&self, input: I) -> Result<(), MachineError> {
        let (tx, rx) = oneshot::channel();
        self.core.post_input(input, Some(tx)).await?;
        rx.await.map_err(|_| MachineError::Abandoned)
    }

    /// Queues a state restore (reported as `StateRestored` + `StateChanged`).
    pub async fn restore_state(&self, state: S) -> Result<(), MachineError> {
        self.core.post_restore(state, None).await
    }

    /// Queues a state restore and waits until it was applied.
    pub async fn restore_state_and_await(&self, state: S) -> Result<(), MachineError> {
        let (tx, rx) = oneshot::channel();
        self.core.post_restore(state, Some(tx)).await?;
        rx.await.map_err(|_| MachineError::Abandoned)
    }

    /// Cloneable handle for posting inputs from elsewhere.
    pub fn sender(&self) -> InputSender<I, E, S> {
        InputSender {
            core: Arc::clone(&self.core),
        }
    }

    /// Attaches the event handler. Fails if one is already attached.
    pub fn attach_event_handler<H>(&self, handler: H) -> Result<EventHandlerAttachment, MachineError>
    where
        H: EventHandler<I, E, S>,
    {
        self.core.events.attach(&self.core, Arc::new(handler))
    }

    /// New cursor into the notification stream, starting at the next notification.
    ///
    /// Returns `None` once the notification stream has ended.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Notification<I, E, S>>> {
        self.core.hub.subscribe()
    }

    /// Interceptor registered under `key`.
    pub fn interceptor(&self, key: &str) -> Option<InterceptorRef<I, E, S>> {
        self.core.interceptors.find(key)
    }

    /// Graceful shutdown with the configured grace period.
    pub async fn shut_down_gracefully(&self) -> Result<(), MachineError> {
        self.shut_down_gracefully_within(self.core.cfg.grace).await
    }

    /// Graceful shutdown, giving side jobs at most `grace` to finish on their own.
    ///
    /// Resolves once the machine is `Cleared`.
    pub async fn shut_down_gracefully_within(&self, grace: Duration) -> Result<(), MachineError> {
        self.core.status.check_can_shut_down()?;
        let (tx, rx) = oneshot::channel();
        self.core
            .inputs
            .enqueue(Queued::new(QueuedKind::ShutDownGracefully(grace), Some(tx)))
            .await
            .map_err(|_| MachineError::QueueClosed {
                queue: self.core.inputs.name(),
            })?;
        rx.await.map_err(|_| MachineError::Abandoned)
    }

    /// Ungraceful teardown: cancels everything and clears the machine.
    pub fn cancel(&self) {
        self.core.root.cancel();
    }

    /// Completes once the machine is `Cleared` and its notifications were published.
    pub async fn closed(&self) {
        self.core.cleared.cancelled().await;
    }
}

/// Cloneable input-posting handle.
pub struct InputSender<I, E, S> {
    core: Arc<Core<I, E, S>>,
}

impl<I, E, S> Clone for InputSender<I, E, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<I: Message, E: Message, S: Message> InputSender<I, E, S> {
    /// See [`Machine::send`].
    pub async fn send(&self, input: I) -> Result<(), MachineError> {
        self.core.post_input(input, None).await
    }

    /// See [`Machine::try_send`].
    pub fn try_send(&self, input: I) -> Result<(), MachineError> {
        self.core.try_post_input(input)
    }

    /// See [`Machine::send_and_await`].
    pub async fn send_and_await(&self, input: I) -> Result<(), MachineError> {
        let (tx, rx) = oneshot::channel();
        self.core.post_input(input, Some(tx)).await?;
        rx.await.map_err(|_| MachineError::Abandoned)
    }
}

/// Current state plus a stream of future values.
///
/// Intermediate values may be skipped by a slow observer; the latest is never missed.
pub struct StateObserver<S> {
    rx: watch::Receiver<S>,
    cleared: CancellationToken,
}

impl<S: Clone> StateObserver<S> {
    /// Latest state.
    pub fn current(&self) -> S {
        self.rx.borrow().clone()
    }

    /// Waits for the next state value. Returns `None` once the machine is cleared.
    pub async fn changed(&mut self) -> Option<S> {
        let changed = tokio::select! {
            biased;
            res = self.rx.changed() => res.is_ok(),
            _ = self.cleared.cancelled() => false,
        };
        changed.then(|| self.rx.borrow_and_update().clone())
    }
}

//! # Run one queued item.
//!
//! [`InputRunner`] is the handle a strategy uses to execute what it pulled off the
//! main queue. It performs the whole lifecycle of one item and publishes its
//! notifications, so every strategy reports inputs the same way.
//!
//! ## Lifecycle of `HandleInput`
//! ```text
//! InputAccepted
//!   ├─► snapshot state (only if the strategy rolls back on cancellation)
//!   ├─► guardian = strategy.guardian()
//!   ├─► handler.handle(scope, input)  raced against the cancellation token
//!   │       ├─ Ok      ──► InputHandledSuccessfully
//!   │       ├─ Err/panic ► InputHandlerError
//!   │       └─ cancelled ► [rollback: StateChanged(snapshot)] → InputCancelled
//!   └─► guardian.close(), complete deferred
//! ```
//!
//! ## Rules
//! - Exactly **one** terminal notification per accepted input.
//! - A guardian violation recorded during the invocation is reported as
//!   `InputHandlerError` even when the handler swallowed the `Err`.
//! - Rollback happens only if the cancelled invocation wrote state at least once.
//! - Side jobs launched by the invocation are not affected by its cancellation.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::machine::Core;
use crate::core::queue::Delivery;
use crate::core::scope::HandlerScope;
use crate::core::{Message, spawn_on};
use crate::error::{GuardianError, HandlerError};
use crate::notifications::NotificationKind;

/// Completion signal of a queued item.
pub(crate) type Deferred = oneshot::Sender<()>;

/// Item carried by the main queue.
pub struct Queued<I, E, S> {
    pub(crate) kind: QueuedKind<I, S>,
    pub(crate) deferred: Option<Deferred>,
    _events: std::marker::PhantomData<fn() -> E>,
}

pub(crate) enum QueuedKind<I, S> {
    HandleInput(I),
    RestoreState(S),
    ShutDownGracefully(Duration),
}

impl<I, E, S> Queued<I, E, S> {
    pub(crate) fn new(kind: QueuedKind<I, S>, deferred: Option<Deferred>) -> Self {
        Self {
            kind,
            deferred,
            _events: std::marker::PhantomData,
        }
    }

    /// The input, for `HandleInput` items.
    pub fn input(&self) -> Option<&I> {
        match &self.kind {
            QueuedKind::HandleInput(input) => Some(input),
            _ => None,
        }
    }

    /// The state to restore, for `RestoreState` items.
    pub fn restored_state(&self) -> Option<&S> {
        match &self.kind {
            QueuedKind::RestoreState(state) => Some(state),
            _ => None,
        }
    }

    /// True for the graceful shutdown request.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind, QueuedKind::ShutDownGracefully(_))
    }
}

impl<I: fmt::Debug, E, S: fmt::Debug> fmt::Debug for Queued<I, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            QueuedKind::HandleInput(input) => f.debug_tuple("HandleInput").field(input).finish(),
            QueuedKind::RestoreState(state) => f.debug_tuple("RestoreState").field(state).finish(),
            QueuedKind::ShutDownGracefully(grace) => {
                f.debug_tuple("ShutDownGracefully").field(grace).finish()
            }
        }
    }
}

/// Per-invocation bookkeeping shared between the runner and the handler scope.
#[derive(Default)]
pub(crate) struct Invocation {
    violation: OnceLock<GuardianError>,
    writes: AtomicUsize,
}

impl Invocation {
    pub(crate) fn record_violation(&self, err: GuardianError) {
        let _ = self.violation.set(err);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn violation(&self) -> Option<GuardianError> {
        self.violation.get().cloned()
    }

    fn wrote_state(&self) -> bool {
        self.writes.load(Ordering::Relaxed) > 0
    }
}

enum Outcome {
    Handled,
    Failed(HandlerError),
    Cancelled,
}

/// Executes queued items on behalf of an [`InputStrategy`](crate::InputStrategy).
pub struct InputRunner<I, E, S> {
    core: Arc<Core<I, E, S>>,
}

impl<I, E, S> Clone for InputRunner<I, E, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<I: Message, E: Message, S: Message> InputRunner<I, E, S> {
    pub(crate) fn new(core: Arc<Core<I, E, S>>) -> Self {
        Self { core }
    }

    /// Fresh cancellation token for one item, cancelled on machine teardown.
    pub fn child_token(&self) -> CancellationToken {
        self.core.root.child_token()
    }

    /// Current state snapshot (for admission filters).
    pub fn current_state(&self) -> S {
        self.core.state.get()
    }

    /// Spawns `fut` on the input execution context.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_on(self.core.cfg.dispatchers.inputs.as_ref(), fut)
    }

    /// Spawns `fut` on the input execution context and tracks it in `tracker`.
    pub fn spawn_tracked<F>(&self, tracker: &TaskTracker, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.core.cfg.dispatchers.inputs.as_ref() {
            Some(handle) => tracker.spawn_on(fut, handle),
            None => tracker.spawn(fut),
        }
    }

    /// Refuses an item at admission (`InputRejected`) and completes its deferred.
    pub async fn reject(&self, delivery: Delivery<Queued<I, E, S>>) {
        let (item, _done) = delivery.into_parts();
        if let QueuedKind::HandleInput(input) = item.kind {
            self.core
                .hub
                .notify(NotificationKind::InputRejected(input))
                .await;
        }
        complete(item.deferred);
    }

    /// Runs one item to completion. `token` cancels an in-flight input handler.
    pub async fn run(&self, delivery: Delivery<Queued<I, E, S>>, token: CancellationToken) {
        let (item, done) = delivery.into_parts();
        let Queued { kind, deferred, .. } = item;
        match kind {
            QueuedKind::HandleInput(input) => {
                self.handle_input(input, token).await;
                complete(deferred);
            }
            QueuedKind::RestoreState(state) => {
                self.restore_state(state).await;
                complete(deferred);
            }
            QueuedKind::ShutDownGracefully(grace) => {
                Arc::clone(&self.core).spawn_shutdown(grace, deferred);
            }
        }
        drop(done);
    }

    async fn restore_state(&self, state: S) {
        match self.core.state.set(state.clone()) {
            Ok(_) => {
                self.core
                    .hub
                    .notify(NotificationKind::StateRestored(state.clone()))
                    .await;
                self.core
                    .hub
                    .notify(NotificationKind::StateChanged(state))
                    .await;
            }
            Err(error) => {
                tracing::warn!(machine = %self.core.name, %error, "state restore refused");
            }
        }
    }

    async fn handle_input(&self, input: I, token: CancellationToken) {
        let core = &self.core;
        core.hub
            .notify(NotificationKind::InputAccepted(input.clone()))
            .await;

        let snapshot = core
            .strategy
            .rollback_on_cancellation()
            .then(|| core.state.get());
        let guardian = core.strategy.guardian();
        let invocation = Arc::new(Invocation::default());
        let scope = HandlerScope::new(
            Arc::clone(core),
            Arc::clone(&guardian),
            Arc::clone(&invocation),
            token.clone(),
        );

        let handler = Arc::clone(&core.handler);
        let body = std::panic::AssertUnwindSafe(handler.handle(scope, input.clone())).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Outcome::Cancelled,
            res = body => match res {
                Ok(Ok(())) => Outcome::Handled,
                Ok(Err(HandlerError::Cancelled)) => Outcome::Cancelled,
                Ok(Err(e)) => Outcome::Failed(e),
                Err(panic) => Outcome::Failed(HandlerError::from_panic(panic)),
            },
        };
        guardian.close();

        let violation = invocation.violation().map(HandlerError::from);
        let kind = match outcome {
            Outcome::Cancelled => {
                if let Some(previous) = snapshot.filter(|_| invocation.wrote_state()) {
                    self.rollback(previous).await;
                }
                NotificationKind::InputCancelled(input)
            }
            Outcome::Handled => match violation {
                Some(error) => NotificationKind::InputHandlerError { input, error },
                None => NotificationKind::InputHandledSuccessfully(input),
            },
            Outcome::Failed(error) => NotificationKind::InputHandlerError {
                input,
                error: violation.unwrap_or(error),
            },
        };
        core.hub.notify(kind).await;
    }

    async fn rollback(&self, previous: S) {
        match self.core.state.set(previous.clone()) {
            Ok(_) => {
                self.core
                    .hub
                    .notify(NotificationKind::StateChanged(previous))
                    .await;
            }
            Err(error) => {
                tracing::debug!(machine = %self.core.name, %error, "rollback skipped");
            }
        }
    }
}

fn complete(deferred: Option<Deferred>) {
    if let Some(tx) = deferred {
        let _ = tx.send(());
    }
}

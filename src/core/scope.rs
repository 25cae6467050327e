//! # Scopes: capability-scoped context objects handed to user code.
//!
//! Each kind of user code receives its own scope exposing only the operations legal
//! in that context:
//!
//! | Scope                   | Given to            | Operations                                                      |
//! |-------------------------|---------------------|-----------------------------------------------------------------|
//! | [`HandlerScope`]        | input handlers      | state read/update, post event, side jobs, no-op                 |
//! | [`SideJobScope`]        | side job bodies     | state read/update, post input, post event, cancellation         |
//! | [`EventHandlerScope`]   | event handlers      | post input, state read                                          |
//! | [`InterceptorScope`]    | interceptors        | post input, restore state, state read                           |
//!
//! `HandlerScope` consults the invocation's [`Guardian`] before every operation.
//! A violation is returned to the caller and also recorded on the invocation, so it
//! is reported as `InputHandlerError` even if the handler ignores the `Err`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::Message;
use crate::core::machine::Core;
use crate::core::runner::Invocation;
use crate::error::{GuardianError, HandlerError, MachineError};
use crate::notifications::{NotificationKind, SideJobRef};
use crate::sidejobs::{self, RestartState};
use crate::strategies::Guardian;

/// Context of one input handler invocation.
pub struct HandlerScope<I, E, S> {
    core: Arc<Core<I, E, S>>,
    guardian: Arc<dyn Guardian>,
    invocation: Arc<Invocation>,
    token: CancellationToken,
}

impl<I: Message, E: Message, S: Message> HandlerScope<I, E, S> {
    pub(crate) fn new(
        core: Arc<Core<I, E, S>>,
        guardian: Arc<dyn Guardian>,
        invocation: Arc<Invocation>,
        token: CancellationToken,
    ) -> Self {
        Self {
            core,
            guardian,
            invocation,
            token,
        }
    }

    fn guard(&self, check: Result<(), GuardianError>) -> Result<(), HandlerError> {
        check.map_err(|err| {
            self.invocation.record_violation(err.clone());
            HandlerError::from(err)
        })
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> Result<S, HandlerError> {
        self.guard(self.guardian.check_state_access())?;
        Ok(self.core.state.get())
    }

    /// Applies `f` to the state atomically.
    ///
    /// `f` may run more than once under contention; keep it free of side effects.
    pub async fn update_state<F>(&self, f: F) -> Result<(), HandlerError>
    where
        F: Fn(&S) -> S + Send,
    {
        self.update_state_and_get(f).await.map(|_| ())
    }

    /// Applies `f` atomically and returns the new state.
    pub async fn update_state_and_get<F>(&self, f: F) -> Result<S, HandlerError>
    where
        F: Fn(&S) -> S + Send,
    {
        self.guard(self.guardian.check_state_update())?;
        let (_, new) = self.core.state.update(f)?;
        self.wrote(new.clone()).await;
        Ok(new)
    }

    /// Applies `f` atomically and returns the previous state.
    pub async fn get_and_update_state<F>(&self, f: F) -> Result<S, HandlerError>
    where
        F: Fn(&S) -> S + Send,
    {
        self.guard(self.guardian.check_state_update())?;
        let (old, new) = self.core.state.update(f)?;
        self.wrote(new).await;
        Ok(old)
    }

    async fn wrote(&self, new: S) {
        self.invocation.record_write();
        self.core
            .hub
            .notify(NotificationKind::StateChanged(new))
            .await;
    }

    /// Posts a one-shot event. Waits while the event queue is full.
    pub async fn post_event(&self, event: E) -> Result<(), HandlerError> {
        self.guard(self.guardian.check_post_event())?;
        self.core.post_event(event).await?;
        Ok(())
    }

    /// Starts `block` as the side job at `key`, replacing any job running there.
    ///
    /// Returns once the request is queued; the job itself runs later, detached from
    /// this invocation (cancelling the input does not cancel the job).
    pub async fn side_job<F, Fut>(
        &self,
        key: impl Into<Arc<str>>,
        block: F,
    ) -> Result<SideJobRef, HandlerError>
    where
        F: FnOnce(SideJobScope<I, E, S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.guard(self.guardian.check_side_job())?;
        let job = self.core.start_side_job(key.into(), sidejobs::boxed(block)).await?;
        Ok(job)
    }

    /// Cancels the side job at `key`, if one is running.
    pub async fn cancel_side_job(&self, key: impl Into<Arc<str>>) -> Result<(), HandlerError> {
        self.guard(self.guardian.check_side_job())?;
        self.core.cancel_side_job(key.into()).await?;
        Ok(())
    }

    /// Declares that this input intentionally does nothing.
    pub fn no_op(&self) -> Result<(), HandlerError> {
        self.guard(self.guardian.check_no_op())
    }

    /// True once this invocation was cancelled (a newer input, or teardown).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when this invocation is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Context of one side job.
pub struct SideJobScope<I, E, S> {
    core: Arc<Core<I, E, S>>,
    job: SideJobRef,
    token: CancellationToken,
}

impl<I: Message, E: Message, S: Message> SideJobScope<I, E, S> {
    pub(crate) fn new(core: Arc<Core<I, E, S>>, job: SideJobRef, token: CancellationToken) -> Self {
        Self { core, job, token }
    }

    /// Key the job was started at.
    pub fn key(&self) -> &str {
        &self.job.key
    }

    /// Invocation id, unique within the machine.
    pub fn id(&self) -> u64 {
        self.job.id
    }

    pub fn restart_state(&self) -> RestartState {
        self.job.restart
    }

    /// Posts an input to the main queue. Waits while the queue is full.
    ///
    /// A refused input is reported as `InputDropped`.
    pub async fn post_input(&self, input: I) -> Result<(), MachineError> {
        self.core.post_input(input, None).await
    }

    /// Posts a one-shot event.
    pub async fn post_event(&self, event: E) -> Result<(), MachineError> {
        self.core.post_event(event).await
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> S {
        self.core.state.get()
    }

    /// Applies `f` to the state atomically.
    ///
    /// Not gated by the strategy's guardian: under the parallel strategy this is
    /// the way to change state. `f` may run more than once under contention.
    pub async fn update_state<F>(&self, f: F) -> Result<(), MachineError>
    where
        F: Fn(&S) -> S + Send,
    {
        self.update_state_and_get(f).await.map(|_| ())
    }

    /// Applies `f` atomically and returns the new state.
    pub async fn update_state_and_get<F>(&self, f: F) -> Result<S, MachineError>
    where
        F: Fn(&S) -> S + Send,
    {
        let (_, new) = self.write(f).await?;
        Ok(new)
    }

    /// Applies `f` atomically and returns the previous state.
    pub async fn get_and_update_state<F>(&self, f: F) -> Result<S, MachineError>
    where
        F: Fn(&S) -> S + Send,
    {
        let (old, _) = self.write(f).await?;
        Ok(old)
    }

    async fn write<F>(&self, f: F) -> Result<(S, S), MachineError>
    where
        F: Fn(&S) -> S + Send,
    {
        let (old, new) = self.core.state.update(f)?;
        self.core
            .hub
            .notify(NotificationKind::StateChanged(new.clone()))
            .await;
        Ok((old, new))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the job is cancelled (replaced, cancelled by key, or shutdown).
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Context of one event handler invocation.
pub struct EventHandlerScope<I, E, S> {
    core: Arc<Core<I, E, S>>,
}

impl<I: Message, E: Message, S: Message> EventHandlerScope<I, E, S> {
    pub(crate) fn new(core: Arc<Core<I, E, S>>) -> Self {
        Self { core }
    }

    /// Posts an input to the main queue.
    pub async fn post_input(&self, input: I) -> Result<(), MachineError> {
        self.core.post_input(input, None).await
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> S {
        self.core.state.get()
    }
}

/// Handle given to an interceptor for calling back into its machine.
pub struct InterceptorScope<I, E, S> {
    core: Arc<Core<I, E, S>>,
    name: &'static str,
}

impl<I: Message, E: Message, S: Message> InterceptorScope<I, E, S> {
    pub(crate) fn new(core: Arc<Core<I, E, S>>, name: &'static str) -> Self {
        Self { core, name }
    }

    /// Posts an input to the main queue.
    pub async fn post_input(&self, input: I) -> Result<(), MachineError> {
        self.core.post_input(input, None).await
    }

    /// Queues a state restore. The state is replaced when the strategy runs the item.
    pub async fn restore_state(&self, state: S) -> Result<(), MachineError> {
        self.core.post_restore(state, None).await
    }

    /// Queues a state restore and waits until it was applied.
    pub async fn restore_state_and_await(&self, state: S) -> Result<(), MachineError> {
        let (tx, rx) = oneshot::channel();
        self.core.post_restore(state, Some(tx)).await?;
        rx.await.map_err(|_| MachineError::Abandoned)
    }

    /// Current state snapshot.
    pub fn current_state(&self) -> S {
        self.core.state.get()
    }

    /// Name of the machine this interceptor is attached to.
    pub fn machine_name(&self) -> &str {
        &self.core.name
    }

    /// Name of the interceptor holding this scope.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

//! # LIFO strategy: the latest input wins.
//!
//! At most one input is handled at a time. When a new input is admitted while
//! another is in flight, the in-flight one is cancelled and fully wound down
//! (including rollback, if enabled) before the new one starts.
//!
//! ```text
//! recv(item)
//!   ├─ ShutDownGracefully ─────────────────────► run inline, current input untouched
//!   ├─ filter(state, input) == Drop ───────────► InputRejected, current input untouched
//!   └─ otherwise:
//!        ├─ cancel(current) → await its end      (InputCancelled [+ rollback StateChanged])
//!        └─ spawn run(item) as the new current
//! ```
//!
//! ## Rules
//! - A cancelled input produces exactly one `InputCancelled`, never `InputHandledSuccessfully`.
//! - The rollback snapshot is taken when an input is accepted, not when the strategy is built.
//! - `RestoreState` items preempt like inputs; they are never filtered.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::Message;
use crate::core::queue::QueueReceiver;
use crate::core::runner::{InputRunner, Queued};

use super::{Guardian, GuardianFactory, InputStrategy, default_guardian_factory};

/// Verdict of a LIFO admission filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Admit the input (cancelling the in-flight one).
    Accept,
    /// Refuse the input; it is reported as `InputRejected`.
    Drop,
}

type Filter<I, S> = Arc<dyn Fn(&S, &I) -> FilterDecision + Send + Sync>;

/// Cancel-and-replace strategy.
pub struct LifoStrategy<I, S> {
    guardian: GuardianFactory,
    rollback: bool,
    filter: Option<Filter<I, S>>,
}

impl<I, S> LifoStrategy<I, S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guardian: default_guardian_factory(),
            rollback: false,
            filter: None,
        }
    }

    /// Reverts state written by a cancelled input before the next one starts.
    #[must_use]
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Inspects `(current_state, input)` before any cancellation happens.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&S, &I) -> FilterDecision + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Uses `factory` to create the guardian of each invocation.
    #[must_use]
    pub fn with_guardian<G, F>(mut self, factory: F) -> Self
    where
        G: Guardian,
        F: Fn() -> G + Send + Sync + 'static,
    {
        self.guardian = Arc::new(move || Arc::new(factory()) as Arc<dyn Guardian>);
        self
    }
}

impl<I, S> Default for LifoStrategy<I, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S> Clone for LifoStrategy<I, S> {
    fn clone(&self) -> Self {
        Self {
            guardian: Arc::clone(&self.guardian),
            rollback: self.rollback,
            filter: self.filter.clone(),
        }
    }
}

impl<I, S> fmt::Debug for LifoStrategy<I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifoStrategy")
            .field("rollback", &self.rollback)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[async_trait]
impl<I: Message, E: Message, S: Message> InputStrategy<I, E, S> for LifoStrategy<I, S> {
    fn name(&self) -> &'static str {
        "lifo"
    }

    fn rollback_on_cancellation(&self) -> bool {
        self.rollback
    }

    fn guardian(&self) -> Arc<dyn Guardian> {
        (self.guardian)()
    }

    async fn process(
        &self,
        mut queue: QueueReceiver<Queued<I, E, S>>,
        runner: InputRunner<I, E, S>,
    ) {
        let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;

        while let Some(delivery) = queue.recv().await {
            if delivery.item().is_shutdown() {
                runner.run(delivery, runner.child_token()).await;
                continue;
            }

            if let (Some(filter), Some(input)) = (&self.filter, delivery.item().input()) {
                if filter(&runner.current_state(), input) == FilterDecision::Drop {
                    runner.reject(delivery).await;
                    continue;
                }
            }

            if let Some((token, handle)) = current.take() {
                token.cancel();
                let _ = handle.await;
            }

            let token = runner.child_token();
            let job_token = token.clone();
            let job_runner = runner.clone();
            let handle = runner.spawn(async move { job_runner.run(delivery, job_token).await });
            current = Some((token, handle));
        }

        if let Some((_, handle)) = current {
            let _ = handle.await;
        }
    }
}

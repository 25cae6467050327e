//! # Parallel strategy: every accepted input runs concurrently.
//!
//! No ordering guarantee between inputs and no cancellation of in-flight work.
//! Handlers may not update state directly ([`ParallelGuardian`]); they mutate it
//! by posting inputs from side jobs, or through interceptors restoring state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;

use crate::core::Message;
use crate::core::queue::QueueReceiver;
use crate::core::runner::{InputRunner, Queued};

use super::{Guardian, GuardianFactory, InputStrategy, ParallelGuardian};

/// Unordered concurrent strategy.
#[derive(Clone)]
pub struct ParallelStrategy {
    guardian: GuardianFactory,
}

impl ParallelStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guardian: Arc::new(|| Arc::new(ParallelGuardian::new()) as Arc<dyn Guardian>),
        }
    }

    /// Uses `factory` to create the guardian of each invocation.
    ///
    /// The factory's guardian is used as-is; wrap it in [`ParallelGuardian`] to keep
    /// the no-state-updates rule.
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

impl Default for ParallelStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: Message, E: Message, S: Message> InputStrategy<I, E, S> for ParallelStrategy {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn guardian(&self) -> Arc<dyn Guardian> {
        (self.guardian)()
    }

    async fn process(
        &self,
        mut queue: QueueReceiver<Queued<I, E, S>>,
        runner: InputRunner<I, E, S>,
    ) {
        let tracker = TaskTracker::new();

        while let Some(delivery) = queue.recv().await {
            let token = runner.child_token();
            let job_runner = runner.clone();
            runner.spawn_tracked(&tracker, async move { job_runner.run(delivery, token).await });
        }

        tracker.close();
        tracker.wait().await;
    }
}

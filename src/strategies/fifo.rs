//! # FIFO strategy: strict arrival order, one input at a time.
//!
//! A later input always waits for the earlier one to reach a terminal
//! notification. Nothing is ever cancelled by the strategy itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Message;
use crate::core::queue::QueueReceiver;
use crate::core::runner::{InputRunner, Queued};

use super::{Guardian, GuardianFactory, InputStrategy, default_guardian_factory};

/// Strictly sequential strategy.
#[derive(Clone)]
pub struct FifoStrategy {
    guardian: GuardianFactory,
}

impl FifoStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guardian: default_guardian_factory(),
        }
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

impl Default for FifoStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: Message, E: Message, S: Message> InputStrategy<I, E, S> for FifoStrategy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn guardian(&self) -> Arc<dyn Guardian> {
        (self.guardian)()
    }

    async fn process(
        &self,
        mut queue: QueueReceiver<Queued<I, E, S>>,
        runner: InputRunner<I, E, S>,
    ) {
        while let Some(delivery) = queue.recv().await {
            runner.run(delivery, runner.child_token()).await;
        }
    }
}

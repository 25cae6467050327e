//! # Input strategies: admission, scheduling and cancellation policies.
//!
//! An [`InputStrategy`] owns the consumption loop of the main queue. It decides
//! which queued items run, in which order, whether they may overlap, and whether
//! an in-flight input is cancelled when a newer one arrives.
//!
//! ```text
//! Machine::send(input) ──► [main queue] ──► InputStrategy::process(queue, runner)
//!                                               │
//!                                               ├─ FIFO:     runner.run(item)            (one at a time)
//!                                               ├─ LIFO:     cancel current, runner.run  (latest wins)
//!                                               └─ Parallel: spawn runner.run per item   (unordered)
//! ```
//!
//! | Strategy               | Concurrency | Cancels in-flight | Rollback flag | Guardian                    |
//! |------------------------|-------------|-------------------|---------------|-----------------------------|
//! | [`FifoStrategy`]       | 1           | never             | ignored       | [`DefaultGuardian`]         |
//! | [`LifoStrategy`]       | 1           | on newer input    | configurable  | [`DefaultGuardian`]         |
//! | [`ParallelStrategy`]   | unbounded   | never             | ignored       | [`ParallelGuardian`]        |
//!
//! Every strategy accepts a custom guardian via `with_guardian`.
//!
//! ## Custom strategies
//! A strategy only needs to pull [`Delivery`](crate::Delivery) items from the queue and
//! hand them to [`InputRunner::run`](crate::InputRunner::run) with a cancellation token.
//! The runner emits all notifications, applies the guardian, and performs rollback if
//! the strategy reports `rollback_on_cancellation() == true`. How rollback composes with
//! partial concurrency is the strategy author's responsibility.

mod fifo;
mod guardian;
mod lifo;
mod parallel;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Message;
use crate::core::queue::QueueReceiver;
use crate::core::runner::{InputRunner, Queued};

pub use fifo::FifoStrategy;
pub use guardian::{DefaultGuardian, Guardian, ParallelGuardian, SideJobsLastGuardian};
pub use lifo::{FilterDecision, LifoStrategy};
pub use parallel::ParallelStrategy;

/// Creates a fresh guardian for each accepted input.
pub type GuardianFactory = Arc<dyn Fn() -> Arc<dyn Guardian> + Send + Sync>;

/// Pluggable scheduling policy for the main queue.
#[async_trait]
pub trait InputStrategy<I: Message, E: Message, S: Message>: Send + Sync + 'static {
    /// Human-readable name (for logs).
    fn name(&self) -> &'static str;

    /// Whether state written by a cancelled input is reverted to its admission-time snapshot.
    fn rollback_on_cancellation(&self) -> bool {
        false
    }

    /// Guardian for one invocation.
    fn guardian(&self) -> Arc<dyn Guardian>;

    /// Consumes the queue until it is closed and drained, then waits for in-flight work.
    async fn process(&self, queue: QueueReceiver<Queued<I, E, S>>, runner: InputRunner<I, E, S>);
}

pub(crate) fn default_guardian_factory() -> GuardianFactory {
    Arc::new(|| Arc::new(DefaultGuardian::new()) as Arc<dyn Guardian>)
}

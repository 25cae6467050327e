//! Runtime core: orchestration and lifecycle.
//!
//! This module contains the embedded implementation of the statevisor runtime.
//! The public entry points are [`Machine`] and [`MachineBuilder`]; everything else
//! here is plumbing shared by strategies, side jobs, events and interceptors.
//!
//! Internal modules:
//! - [`machine`]: coordinator, startup order and the graceful / ungraceful shutdown paths;
//! - [`runner`]: executes one queued item and publishes its notifications;
//! - [`scope`]: capability-scoped context objects handed to user code;
//! - [`state`]: atomic state cell;
//! - [`status`]: lifecycle status with legal-transition checks;
//! - [`queue`]: bounded admission queue with flush support.

mod builder;
mod config;
pub(crate) mod machine;
pub(crate) mod queue;
pub(crate) mod runner;
pub(crate) mod scope;
mod state;
mod status;

use std::fmt::Debug;
use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use builder::MachineBuilder;
pub use config::{Dispatchers, MachineConfig};
pub use machine::{InputSender, Machine, StateObserver};
pub use queue::{Completion, Delivery, QueueReceiver, Rejected};
pub use runner::{InputRunner, Queued};
pub use scope::{EventHandlerScope, HandlerScope, InterceptorScope, SideJobScope};
pub use status::Status;

pub(crate) use state::StateStore;
pub(crate) use status::{Resource, StatusCell};

/// Bound shared by inputs, events and states.
///
/// Blanket-implemented for every `Clone + Debug + Send + Sync + 'static` type.
pub trait Message: Clone + Debug + Send + Sync + 'static {}

impl<T: Clone + Debug + Send + Sync + 'static> Message for T {}

/// Spawns on `rt` if given, else on the ambient runtime.
pub(crate) fn spawn_on<F>(rt: Option<&Handle>, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match rt {
        Some(handle) => handle.spawn(fut),
        None => tokio::spawn(fut),
    }
}

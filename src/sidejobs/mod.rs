//! # Side jobs: keyed, cancellable background work launched by input handlers.
//!
//! A side job outlives the input invocation that registered it; it is owned by the
//! machine's root scope and only ends by returning, failing, being replaced at the
//! same key, being cancelled by key, or being force-cancelled during shutdown.
//!
//! - [`registry`]: the key → job map, request loop and two-phase shutdown.

mod registry;

use std::future::Future;

use futures::future::BoxFuture;

use crate::core::SideJobScope;
use crate::error::HandlerError;

pub(crate) use registry::Registry;

/// Whether a side job is the first one ever started at its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    /// First invocation at this key.
    Initial,
    /// The key was used before (the previous job may have been cancelled by this one).
    Restarted,
}

impl RestartState {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RestartState::Initial => "initial",
            RestartState::Restarted => "restarted",
        }
    }
}

/// Type-erased side job body.
pub(crate) type SideJobBody<I, E, S> =
    Box<dyn FnOnce(SideJobScope<I, E, S>) -> BoxFuture<'static, Result<(), HandlerError>> + Send>;

pub(crate) fn boxed<I, E, S, F, Fut>(block: F) -> SideJobBody<I, E, S>
where
    F: FnOnce(SideJobScope<I, E, S>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Box::new(move |scope| Box::pin(block(scope)))
}

//! # Event handler trait and function-backed implementation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{EventHandlerScope, Message};
use crate::error::HandlerError;

/// Shared handle to an event handler.
pub type EventHandlerRef<I, E, S> = Arc<dyn EventHandler<I, E, S>>;

/// # Consumer of one-shot events.
///
/// At most one event handler is attached to a machine at a time. A failing event is
/// reported as `EventHandlerError` and the pipeline moves on to the next one.
#[async_trait]
pub trait EventHandler<I: Message, E: Message, S: Message>: Send + Sync + 'static {
    /// Handles one event.
    async fn handle(&self, scope: EventHandlerScope<I, E, S>, event: E) -> Result<(), HandlerError>;
}

/// Function-backed event handler.
#[derive(Debug)]
pub struct EventHandlerFn<F> {
    f: F,
}

impl<F> EventHandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<I, E, S, F, Fut> EventHandler<I, E, S> for EventHandlerFn<F>
where
    I: Message,
    E: Message,
    S: Message,
    F: Fn(EventHandlerScope<I, E, S>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, scope: EventHandlerScope<I, E, S>, event: E) -> Result<(), HandlerError> {
        (self.f)(scope, event).await
    }
}

#[async_trait]
impl<I, E, S, H> EventHandler<I, E, S> for Arc<H>
where
    I: Message,
    E: Message,
    S: Message,
    H: EventHandler<I, E, S> + ?Sized,
{
    async fn handle(&self, scope: EventHandlerScope<I, E, S>, event: E) -> Result<(), HandlerError> {
        (**self).handle(scope, event).await
    }
}

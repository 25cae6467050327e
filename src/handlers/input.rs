//! # Input handler trait and function-backed implementation.
//!
//! The handler receives an owned [`HandlerScope`] and the input. It may suspend
//! anywhere; the active strategy may cancel it at any suspension point.
//!
//! ## Example
//! ```rust
//! use statevisor::{HandlerScope, InputHandlerFn, InputHandlerRef};
//!
//! #[derive(Clone, Debug)]
//! enum Input { Increment }
//!
//! let handler: InputHandlerRef<Input, (), u32> =
//!     InputHandlerFn::arc(|scope: HandlerScope<Input, (), u32>, input: Input| async move {
//!         match input {
//!             Input::Increment => scope.update_state(|n| n + 1).await,
//!         }
//!     });
//! # let _ = handler;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{HandlerScope, Message};
use crate::error::HandlerError;

/// Shared handle to an input handler.
pub type InputHandlerRef<I, E, S> = Arc<dyn InputHandler<I, E, S>>;

/// # Logic run for every accepted input.
///
/// Returning `Err` (or panicking) is reported as `InputHandlerError`; it never stops
/// the machine.
#[async_trait]
pub trait InputHandler<I: Message, E: Message, S: Message>: Send + Sync + 'static {
    /// Handles one input.
    async fn handle(&self, scope: HandlerScope<I, E, S>, input: I) -> Result<(), HandlerError>;
}

/// Function-backed input handler.
///
/// Wraps a closure that *creates* a new future per input.
#[derive(Debug)]
pub struct InputHandlerFn<F> {
    f: F,
}

impl<F> InputHandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<I, E, S, F, Fut> InputHandler<I, E, S> for InputHandlerFn<F>
where
    I: Message,
    E: Message,
    S: Message,
    F: Fn(HandlerScope<I, E, S>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, scope: HandlerScope<I, E, S>, input: I) -> Result<(), HandlerError> {
        (self.f)(scope, input).await
    }
}

#[async_trait]
impl<I, E, S, H> InputHandler<I, E, S> for Arc<H>
where
    I: Message,
    E: Message,
    S: Message,
    H: InputHandler<I, E, S> + ?Sized,
{
    async fn handle(&self, scope: HandlerScope<I, E, S>, input: I) -> Result<(), HandlerError> {
        (**self).handle(scope, input).await
    }
}

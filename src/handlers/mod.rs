//! # Handlers: the user-supplied logic of a machine.
//!
//! - [`InputHandler`]: runs once per accepted input, inside a [`HandlerScope`](crate::HandlerScope).
//! - [`EventHandler`]: runs once per emitted event, inside an [`EventHandlerScope`](crate::EventHandlerScope).
//!
//! Both have function-backed adapters ([`InputHandlerFn`], [`EventHandlerFn`]) that
//! create a fresh future per call.

mod event;
mod input;

pub use event::{EventHandler, EventHandlerFn, EventHandlerRef};
pub use input::{InputHandler, InputHandlerFn, InputHandlerRef};

//! Events: one-shot output messages and their dispatch pipeline.
//!
//! Events are produced by input handlers and side jobs and delivered to at most one
//! attached [`EventHandler`](crate::EventHandler), decoupled in timing from input
//! processing.
//!
//! ## Contents
//! - `EventPipeline` (internal): event queue + dispatch loop
//! - [`EventHandlerAttachment`]: handle returned by [`Machine::attach_event_handler`](crate::Machine::attach_event_handler)
//!
//! ## Quick reference
//! - **Publishers**: `HandlerScope::post_event`, `SideJobScope::post_event`.
//! - **Consumer**: the attached event handler (one at a time).
//! - Without an attached handler the queue fills and publishers wait (backpressure).

mod pipeline;

pub(crate) use pipeline::EventPipeline;
pub use pipeline::EventHandlerAttachment;

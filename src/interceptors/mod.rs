//! # Interceptors: observers of a machine's notification stream.
//!
//! Every interceptor gets its own cursor into the broadcast of
//! [`Notification`](crate::Notification)s and its own worker task, so a slow or
//! failing interceptor never blocks the machine or its siblings.
//!
//! ## Contents
//! - [`Interceptor`]: the trait implemented by observers
//! - `InterceptorSet` (internal): subscription + per-interceptor workers
//! - [`Recorder`]: in-memory log with typed accessors (tests, hosting apps)
//! - `LogInterceptor` (feature `logging`): maps notifications to `tracing` events

mod embedded;
mod interceptor;
mod set;

#[cfg(feature = "logging")]
pub use embedded::LogInterceptor;
pub use embedded::Recorder;
pub use interceptor::{Interceptor, InterceptorRef};
pub(crate) use set::InterceptorSet;

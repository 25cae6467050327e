//! Built-in interceptors.
//!
//! - [`Recorder`]: in-memory notification log with typed accessors.
//! - `LogInterceptor` (feature `logging`): one `tracing` event per notification.

#[cfg(feature = "logging")]
mod log;
mod recorder;

#[cfg(feature = "logging")]
pub use log::LogInterceptor;
pub use recorder::Recorder;

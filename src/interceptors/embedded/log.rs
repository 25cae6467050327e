//! # LogInterceptor: notifications as `tracing` events
//!
//! Maps every [`Notification`] to one `tracing` event with structured fields.
//! Use it for tests, demos, or as a baseline for real telemetry.
//!
//! | Notification                                            | Level   |
//! |---------------------------------------------------------|---------|
//! | handler / side job errors, interceptor failures, unhandled | `error` |
//! | rejected / dropped / cancelled inputs, cancelled side jobs | `warn`  |
//! | status changes                                          | `info`  |
//! | everything else                                         | `debug` |
//!
//! ## Example output
//! ```text
//! INFO  statevisor: status_changed machine="counter" status=running
//! DEBUG statevisor: input_accepted machine="counter" input=Increment
//! ERROR statevisor: input_handler_error machine="counter" input=Fail error=handler failed: boom
//! ```

use async_trait::async_trait;

use crate::core::{InterceptorScope, Message};
use crate::interceptors::Interceptor;
use crate::notifications::{Notification, NotificationKind};

/// Notification logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInterceptor;

impl LogInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<I: Message, E: Message, S: Message> Interceptor<I, E, S> for LogInterceptor {
    fn name(&self) -> &'static str {
        "LogInterceptor"
    }

    async fn on_notification(&self, _scope: &InterceptorScope<I, E, S>, n: &Notification<I, E, S>) {
        let machine = &*n.machine;
        let label = n.kind.as_label();
        match &n.kind {
            NotificationKind::StatusChanged(status) => {
                tracing::info!(machine, %status, "{label}");
            }
            NotificationKind::InputHandlerError { input, error } => {
                tracing::error!(machine, ?input, %error, "{label}");
            }
            NotificationKind::EventHandlerError { event, error } => {
                tracing::error!(machine, ?event, %error, "{label}");
            }
            NotificationKind::SideJobError { job, error } => {
                tracing::error!(machine, key = %job.key, id = job.id, %error, "{label}");
            }
            NotificationKind::InterceptorFailed { name, error } => {
                tracing::error!(machine, interceptor = name, %error, "{label}");
            }
            NotificationKind::UnhandledError { error } => {
                tracing::error!(machine, %error, "{label}");
            }
            NotificationKind::InputRejected(input)
            | NotificationKind::InputDropped(input)
            | NotificationKind::InputCancelled(input) => {
                tracing::warn!(machine, ?input, "{label}");
            }
            NotificationKind::SideJobCancelled(job) => {
                tracing::warn!(machine, key = %job.key, id = job.id, "{label}");
            }
            other => {
                if let Some(input) = other.input() {
                    tracing::debug!(machine, ?input, "{label}");
                } else if let Some(event) = other.event() {
                    tracing::debug!(machine, ?event, "{label}");
                } else if let Some(job) = other.side_job() {
                    tracing::debug!(
                        machine,
                        key = %job.key,
                        id = job.id,
                        restart = job.restart.as_label(),
                        "{label}"
                    );
                } else {
                    match other {
                        NotificationKind::StateChanged(state)
                        | NotificationKind::StateRestored(state) => {
                            tracing::debug!(machine, ?state, "{label}");
                        }
                        _ => tracing::debug!(machine, "{label}"),
                    }
                }
            }
        }
    }
}

//! Error types used by the statevisor runtime, guardians and handlers.
//!
//! This module defines three enums:
//!
//! - [`MachineError`]: errors raised by the orchestration runtime itself.
//! - [`GuardianError`]: illegal operations detected inside one handler invocation.
//! - [`HandlerError`]: errors raised by user handlers, side jobs and interceptors.
//!
//! All three are `Clone` so they can be carried by [`Notification`](crate::Notification)s,
//! and all provide `as_label` for logs/metrics.

use std::fmt;

use thiserror::Error;

/// # Errors produced by the statevisor runtime.
///
/// These represent misuse of the machine lifecycle or operations attempted
/// against a resource that has already been closed by the shutdown sequence.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// A lifecycle operation was attempted from a status that does not allow it.
    #[error("cannot {op} while machine is {status}")]
    IllegalTransition {
        /// Operation that was attempted (`start`, `shut_down`, `clear`).
        op: &'static str,
        /// Label of the status the machine was in.
        status: &'static str,
    },

    /// The state channel is closed; the machine has been cleared.
    #[error("state channel closed")]
    StateClosed,

    /// The named queue no longer admits items.
    #[error("{queue} queue closed")]
    QueueClosed {
        /// Queue name (`inputs`, `events`, `notifications`, `side_jobs`).
        queue: &'static str,
    },

    /// The named queue is at capacity (non-blocking admission only).
    #[error("{queue} queue full")]
    QueueFull {
        /// Queue name.
        queue: &'static str,
    },

    /// Side jobs can no longer be started or cancelled.
    #[error("side jobs closed")]
    SideJobsClosed,

    /// An event handler is already attached to the event pipeline.
    #[error("an event handler is already attached")]
    EventHandlerAttached,

    /// Processing of a queued request ended before it reported completion.
    #[error("request abandoned before completion")]
    Abandoned,
}

impl MachineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use statevisor::MachineError;
    ///
    /// let err = MachineError::QueueClosed { queue: "inputs" };
    /// assert_eq!(err.as_label(), "machine_queue_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            MachineError::IllegalTransition { .. } => "machine_illegal_transition",
            MachineError::StateClosed => "machine_state_closed",
            MachineError::QueueClosed { .. } => "machine_queue_closed",
            MachineError::QueueFull { .. } => "machine_queue_full",
            MachineError::SideJobsClosed => "machine_side_jobs_closed",
            MachineError::EventHandlerAttached => "machine_event_handler_attached",
            MachineError::Abandoned => "machine_request_abandoned",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            MachineError::IllegalTransition { op, status } => {
                format!("illegal transition: op={op} status={status}")
            }
            other => other.to_string(),
        }
    }
}

/// # Illegal handler operations.
///
/// Raised at the call site by a [`Guardian`](crate::Guardian) check.
/// They indicate a programming mistake inside a handler, not a runtime condition.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardianError {
    /// The handler invocation already returned; its scope must not be used anymore.
    #[error("{operation} called after the handler scope was closed")]
    ScopeClosed {
        /// Scope operation that was attempted.
        operation: &'static str,
    },

    /// A scope operation was issued after a side job had been registered in the same invocation.
    #[error(
        "{operation} called after a side job was registered; side jobs must be the last operation of a handler"
    )]
    SideJobsMustBeLast {
        /// Scope operation that was attempted.
        operation: &'static str,
    },

    /// The active strategy does not permit state updates from handlers.
    #[error("state updates are not allowed under the {strategy} strategy; mutate state through inputs posted by side jobs")]
    StateUpdateDisallowed {
        /// Strategy name.
        strategy: &'static str,
    },
}

impl GuardianError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            GuardianError::ScopeClosed { .. } => "guardian_scope_closed",
            GuardianError::SideJobsMustBeLast { .. } => "guardian_side_jobs_must_be_last",
            GuardianError::StateUpdateDisallowed { .. } => "guardian_state_update_disallowed",
        }
    }
}

/// # Errors produced by user code.
///
/// Returned by input handlers, event handlers, side job bodies and interceptors.
/// They are caught at the dispatch boundary and reported through notifications;
/// they never terminate the machine.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler logic failed.
    #[error("handler failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },

    /// Handler logic panicked; the panic was caught.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// An illegal scope operation was detected.
    #[error(transparent)]
    Guardian(#[from] GuardianError),

    /// The runtime refused the operation (closed queue, closed state, ...).
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The surrounding work was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Wraps any displayable error as [`HandlerError::Failed`].
    ///
    /// # Example
    /// ```
    /// use statevisor::HandlerError;
    ///
    /// let err = HandlerError::fail("boom");
    /// assert_eq!(err.to_string(), "handler failed: boom");
    /// ```
    pub fn fail(error: impl fmt::Display) -> Self {
        HandlerError::Failed {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Failed { .. } => "handler_failed",
            HandlerError::Panicked { .. } => "handler_panicked",
            HandlerError::Guardian(e) => e.as_label(),
            HandlerError::Machine(e) => e.as_label(),
            HandlerError::Cancelled => "handler_cancelled",
        }
    }

    /// Builds [`HandlerError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        HandlerError::Panicked { info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(
            MachineError::IllegalTransition {
                op: "start",
                status: "running"
            }
            .as_label(),
            "machine_illegal_transition"
        );
        assert_eq!(HandlerError::fail("x").as_label(), "handler_failed");
        assert_eq!(
            HandlerError::from(GuardianError::ScopeClosed { operation: "no_op" }).as_label(),
            "guardian_scope_closed"
        );
    }

    #[test]
    fn test_panic_payload_is_rendered() {
        let err = HandlerError::from_panic(Box::new("kaboom"));
        assert_eq!(
            err,
            HandlerError::Panicked {
                info: "kaboom".into()
            }
        );

        let err = HandlerError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "handler panicked: owned");

        let err = HandlerError::from_panic(Box::new(42u8));
        assert_eq!(err.to_string(), "handler panicked: unknown panic");
    }

    #[test]
    fn test_guardian_message_names_operation() {
        let err = GuardianError::SideJobsMustBeLast {
            operation: "update_state",
        };
        assert!(err.to_string().starts_with("update_state called after a side job"));
    }
}

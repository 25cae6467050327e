//! # Lifecycle notifications emitted by a machine.
//!
//! A [`Notification`] is an immutable, timestamped record of exactly one
//! lifecycle transition. The [`NotificationKind`] enum classifies them into:
//! - **Status**: machine lifecycle (`StatusChanged`)
//! - **Inputs**: queued → accepted → handled / cancelled / handler error
//!   (or rejected / dropped before acceptance)
//! - **State**: every applied write (`StateChanged`, `StateRestored`)
//! - **Events**: queued → emitted → handled / handler error
//! - **Side jobs**: queued → started → completed / cancelled / error
//! - **Interceptors**: attached / failed
//! - **Unhandled errors**: anything escaping the per-unit catch boundaries
//!
//! ## Ordering guarantees
//! Each notification has a globally unique sequence number (`seq`) that increases
//! monotonically. Notifications of one input, event or side job are always
//! emitted in lifecycle order.
//!
//! ## Example
//! ```rust
//! use statevisor::{Notification, NotificationKind};
//!
//! let n: Notification<u8, (), ()> = Notification::new("counter", NotificationKind::InputQueued(1));
//! assert_eq!(n.kind.as_label(), "input_queued");
//! assert_eq!(n.kind.input(), Some(&1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::core::Status;
use crate::error::HandlerError;
use crate::sidejobs::RestartState;

/// Global sequence counter for notification ordering.
static NOTIFICATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identity of one side job invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideJobRef {
    /// Caller-chosen key.
    pub key: Arc<str>,
    /// Auto-incrementing invocation id (unique per registry).
    pub id: u64,
    /// Whether this is the first invocation ever made at `key`.
    pub restart: RestartState,
}

/// Classification of lifecycle transitions, with the payload relevant to each.
#[derive(Debug, Clone)]
pub enum NotificationKind<I, E, S> {
    // === Status ===
    /// Machine status changed.
    StatusChanged(Status),

    // === Inputs ===
    /// Input was placed on the main queue.
    InputQueued(I),
    /// Input passed the strategy's admission check and is being handled.
    InputAccepted(I),
    /// Input was refused by the strategy's admission filter.
    InputRejected(I),
    /// Input could not be queued (queue full or closed).
    InputDropped(I),
    /// Input handler returned normally.
    InputHandledSuccessfully(I),
    /// Input handler was cancelled before finishing.
    InputCancelled(I),
    /// Input handler failed.
    InputHandlerError {
        /// The input being handled.
        input: I,
        /// Captured error.
        error: HandlerError,
    },

    // === State ===
    /// State value was replaced. Carries the new value.
    StateChanged(S),
    /// State was explicitly restored through the main queue. Carries the restored value.
    StateRestored(S),

    // === Events ===
    /// Event was placed on the event queue.
    EventQueued(E),
    /// Event was taken off the queue and handed to the attached handler.
    EventEmitted(E),
    /// Event handler returned normally.
    EventHandledSuccessfully(E),
    /// Event handler failed.
    EventHandlerError {
        /// The event being handled.
        event: E,
        /// Captured error.
        error: HandlerError,
    },
    /// An event handler was attached and dispatching started.
    EventProcessingStarted,
    /// The event handler was detached and dispatching stopped.
    EventProcessingStopped,

    // === Side jobs ===
    /// Side job start was requested.
    SideJobQueued(SideJobRef),
    /// Side job body started running.
    SideJobStarted(SideJobRef),
    /// Side job body returned normally.
    SideJobCompleted(SideJobRef),
    /// Side job was cancelled (replaced, cancelled by key, or forced at shutdown).
    SideJobCancelled(SideJobRef),
    /// Side job body failed.
    SideJobError {
        /// The side job.
        job: SideJobRef,
        /// Captured error.
        error: HandlerError,
    },

    // === Interceptors ===
    /// Interceptor finished setup and is receiving notifications.
    InterceptorAttached {
        /// Interceptor name.
        name: &'static str,
    },
    /// Interceptor failed during setup.
    InterceptorFailed {
        /// Interceptor name.
        name: &'static str,
        /// Captured error.
        error: HandlerError,
    },

    // === Catch-all ===
    /// Error escaping every per-unit catch boundary. Indicates a runtime bug; treat as fatal.
    UnhandledError {
        /// Captured error.
        error: HandlerError,
    },
}

impl<I, E, S> NotificationKind<I, E, S> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            NotificationKind::StatusChanged(_) => "status_changed",
            NotificationKind::InputQueued(_) => "input_queued",
            NotificationKind::InputAccepted(_) => "input_accepted",
            NotificationKind::InputRejected(_) => "input_rejected",
            NotificationKind::InputDropped(_) => "input_dropped",
            NotificationKind::InputHandledSuccessfully(_) => "input_handled_successfully",
            NotificationKind::InputCancelled(_) => "input_cancelled",
            NotificationKind::InputHandlerError { .. } => "input_handler_error",
            NotificationKind::StateChanged(_) => "state_changed",
            NotificationKind::StateRestored(_) => "state_restored",
            NotificationKind::EventQueued(_) => "event_queued",
            NotificationKind::EventEmitted(_) => "event_emitted",
            NotificationKind::EventHandledSuccessfully(_) => "event_handled_successfully",
            NotificationKind::EventHandlerError { .. } => "event_handler_error",
            NotificationKind::EventProcessingStarted => "event_processing_started",
            NotificationKind::EventProcessingStopped => "event_processing_stopped",
            NotificationKind::SideJobQueued(_) => "side_job_queued",
            NotificationKind::SideJobStarted(_) => "side_job_started",
            NotificationKind::SideJobCompleted(_) => "side_job_completed",
            NotificationKind::SideJobCancelled(_) => "side_job_cancelled",
            NotificationKind::SideJobError { .. } => "side_job_error",
            NotificationKind::InterceptorAttached { .. } => "interceptor_attached",
            NotificationKind::InterceptorFailed { .. } => "interceptor_failed",
            NotificationKind::UnhandledError { .. } => "unhandled_error",
        }
    }

    /// The input this notification is about, if any.
    pub fn input(&self) -> Option<&I> {
        match self {
            NotificationKind::InputQueued(i)
            | NotificationKind::InputAccepted(i)
            | NotificationKind::InputRejected(i)
            | NotificationKind::InputDropped(i)
            | NotificationKind::InputHandledSuccessfully(i)
            | NotificationKind::InputCancelled(i)
            | NotificationKind::InputHandlerError { input: i, .. } => Some(i),
            _ => None,
        }
    }

    /// The event this notification is about, if any.
    pub fn event(&self) -> Option<&E> {
        match self {
            NotificationKind::EventQueued(e)
            | NotificationKind::EventEmitted(e)
            | NotificationKind::EventHandledSuccessfully(e)
            | NotificationKind::EventHandlerError { event: e, .. } => Some(e),
            _ => None,
        }
    }

    /// The side job this notification is about, if any.
    pub fn side_job(&self) -> Option<&SideJobRef> {
        match self {
            NotificationKind::SideJobQueued(j)
            | NotificationKind::SideJobStarted(j)
            | NotificationKind::SideJobCompleted(j)
            | NotificationKind::SideJobCancelled(j)
            | NotificationKind::SideJobError { job: j, .. } => Some(j),
            _ => None,
        }
    }

    /// The error carried by this notification, if any.
    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            NotificationKind::InputHandlerError { error, .. }
            | NotificationKind::EventHandlerError { error, .. }
            | NotificationKind::SideJobError { error, .. }
            | NotificationKind::InterceptorFailed { error, .. }
            | NotificationKind::UnhandledError { error } => Some(error),
            _ => None,
        }
    }

    /// True for the terminal `StatusChanged(Cleared)` notification.
    pub fn is_cleared(&self) -> bool {
        matches!(self, NotificationKind::StatusChanged(Status::Cleared))
    }
}

/// Timestamped lifecycle record.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `machine`: name of the emitting machine
#[derive(Debug, Clone)]
pub struct Notification<I, E, S> {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Name of the machine that emitted this notification.
    pub machine: Arc<str>,
    /// Transition classification and payload.
    pub kind: NotificationKind<I, E, S>,
}

impl<I, E, S> Notification<I, E, S> {
    /// Creates a notification with the current timestamp and next sequence number.
    pub fn new(machine: impl Into<Arc<str>>, kind: NotificationKind<I, E, S>) -> Self {
        Self {
            seq: NOTIFICATION_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            machine: machine.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Kind = NotificationKind<u8, &'static str, u32>;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Notification::<u8, (), ()>::new("m", NotificationKind::EventProcessingStarted);
        let b = Notification::<u8, (), ()>::new("m", NotificationKind::EventProcessingStopped);
        assert!(b.seq > a.seq);
        assert_eq!(&*a.machine, "m");
    }

    #[test]
    fn test_accessors_pick_payload() {
        let err = HandlerError::fail("x");
        let k: Kind = NotificationKind::InputHandlerError {
            input: 3,
            error: err.clone(),
        };
        assert_eq!(k.input(), Some(&3));
        assert_eq!(k.error(), Some(&err));
        assert!(k.event().is_none());

        let k: Kind = NotificationKind::EventEmitted("nav");
        assert_eq!(k.event(), Some(&"nav"));

        let job = SideJobRef {
            key: "sync".into(),
            id: 1,
            restart: RestartState::Initial,
        };
        let k: Kind = NotificationKind::SideJobCancelled(job.clone());
        assert_eq!(k.side_job(), Some(&job));
        assert_eq!(k.as_label(), "side_job_cancelled");
    }

    #[test]
    fn test_cleared_detection() {
        let k: Kind = NotificationKind::StatusChanged(Status::Cleared);
        assert!(k.is_cleared());
        let k: Kind = NotificationKind::StatusChanged(Status::Running);
        assert!(!k.is_cleared());
    }
}

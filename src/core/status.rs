//! # Machine lifecycle status.
//!
//! ```text
//! NotStarted ──► Running ──► ShuttingDown { per-resource flags } ──► Cleared
//!                   └──────────────────────────────────────────────────┘
//!                              (ungraceful teardown)
//! ```
//!
//! ## Rules
//! - Transitions are monotonic; a status never moves backwards.
//! - Inside `ShuttingDown` each resource flag closes independently and never reopens.
//! - Every transition happens under one lock, so check-then-act cannot race.

use std::fmt;
use std::sync::Mutex;

use crate::error::MachineError;

/// Lifecycle status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Built but not started.
    NotStarted,
    /// Accepting and processing work.
    Running,
    /// Graceful shutdown in progress; each flag tells whether that resource still admits work.
    ShuttingDown {
        /// Main input queue admits new items.
        main_queue_open: bool,
        /// Event queue admits new events.
        events_open: bool,
        /// New side jobs may be started.
        side_jobs_open: bool,
        /// Side jobs may still be cancelled by key.
        side_job_cancellation_open: bool,
    },
    /// Fully stopped. State is frozen.
    Cleared,
}

/// Resources closed one at a time during graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resource {
    MainQueue,
    Events,
    SideJobs,
    SideJobCancellation,
}

impl Status {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::Running => "running",
            Status::ShuttingDown { .. } => "shutting_down",
            Status::Cleared => "cleared",
        }
    }

    /// True for [`Status::Cleared`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Cleared)
    }

    fn is_open(&self, resource: Resource) -> bool {
        match *self {
            Status::Running => true,
            Status::ShuttingDown {
                main_queue_open,
                events_open,
                side_jobs_open,
                side_job_cancellation_open,
            } => match resource {
                Resource::MainQueue => main_queue_open,
                Resource::Events => events_open,
                Resource::SideJobs => side_jobs_open,
                Resource::SideJobCancellation => side_job_cancellation_open,
            },
            Status::NotStarted | Status::Cleared => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Shared, lock-protected [`Status`] with legal-transition checks.
#[derive(Debug)]
pub(crate) struct StatusCell {
    inner: Mutex<Status>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Status::NotStarted),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub(crate) fn get(&self) -> Status {
        self.with(|s| *s)
    }

    /// `NotStarted → Running`.
    pub(crate) fn start(&self) -> Result<Status, MachineError> {
        self.with(|s| match s {
            Status::NotStarted => {
                *s = Status::Running;
                Ok(*s)
            }
            other => Err(illegal("start", other)),
        })
    }

    /// Fails unless the machine is `Running`.
    pub(crate) fn check_can_shut_down(&self) -> Result<(), MachineError> {
        self.with(|s| match s {
            Status::Running => Ok(()),
            other => Err(illegal("shut down", other)),
        })
    }

    /// `Running → ShuttingDown` with every resource still open.
    pub(crate) fn begin_shutdown(&self) -> Result<Status, MachineError> {
        self.with(|s| match s {
            Status::Running => {
                *s = Status::ShuttingDown {
                    main_queue_open: true,
                    events_open: true,
                    side_jobs_open: true,
                    side_job_cancellation_open: true,
                };
                Ok(*s)
            }
            other => Err(illegal("shut down", other)),
        })
    }

    /// Closes one resource flag. Only meaningful inside `ShuttingDown`.
    pub(crate) fn close(&self, resource: Resource) -> Status {
        self.with(|s| {
            if let Status::ShuttingDown {
                main_queue_open,
                events_open,
                side_jobs_open,
                side_job_cancellation_open,
            } = s
            {
                let flag = match resource {
                    Resource::MainQueue => main_queue_open,
                    Resource::Events => events_open,
                    Resource::SideJobs => side_jobs_open,
                    Resource::SideJobCancellation => side_job_cancellation_open,
                };
                *flag = false;
            }
            *s
        })
    }

    /// `Running | ShuttingDown → Cleared`.
    ///
    /// Returns `Ok(true)` for the caller that performed the transition, `Ok(false)`
    /// if the machine was already cleared.
    pub(crate) fn try_clear(&self) -> Result<bool, MachineError> {
        self.with(|s| match s {
            Status::Running | Status::ShuttingDown { .. } => {
                *s = Status::Cleared;
                Ok(true)
            }
            Status::Cleared => Ok(false),
            Status::NotStarted => Err(illegal("clear", &Status::NotStarted)),
        })
    }

    pub(crate) fn is_open(&self, resource: Resource) -> bool {
        self.with(|s| s.is_open(resource))
    }
}

fn illegal(op: &'static str, status: &Status) -> MachineError {
    MachineError::IllegalTransition {
        op,
        status: status.as_label(),
    }
}

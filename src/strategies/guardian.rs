//! # Guardians: per-invocation capability checks.
//!
//! A [`Guardian`] is created for every accepted input and consulted synchronously
//! by each [`HandlerScope`](crate::HandlerScope) operation. Once the handler returns,
//! the runner calls [`Guardian::close`]; every check after that fails.
//!
//! ## Provided guardians
//! | Guardian                 | Rule                                                              |
//! |--------------------------|-------------------------------------------------------------------|
//! | [`DefaultGuardian`]      | everything allowed until closed                                   |
//! | [`SideJobsLastGuardian`] | after the first side job, only more side jobs are allowed         |
//! | [`ParallelGuardian`]     | wraps another guardian and refuses state updates                  |
//!
//! Guardians compose: `ParallelGuardian::wrap(SideJobsLastGuardian::new())` enforces both rules.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GuardianError;

/// Capability gate for one handler invocation.
///
/// Implementations use interior mutability; checks may be issued from any thread.
pub trait Guardian: Send + Sync + 'static {
    /// Reading the current state.
    fn check_state_access(&self) -> Result<(), GuardianError>;

    /// Writing the state.
    fn check_state_update(&self) -> Result<(), GuardianError>;

    /// Registering or cancelling a side job.
    fn check_side_job(&self) -> Result<(), GuardianError>;

    /// Posting an event.
    fn check_post_event(&self) -> Result<(), GuardianError>;

    /// Declaring that the input intentionally does nothing.
    fn check_no_op(&self) -> Result<(), GuardianError>;

    /// Marks the invocation finished.
    fn close(&self);
}

/// Permissive guardian: every operation is legal until [`close`](Guardian::close).
#[derive(Debug, Default)]
pub struct DefaultGuardian {
    closed: AtomicBool,
}

impl DefaultGuardian {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, operation: &'static str) -> Result<(), GuardianError> {
        if self.closed.load(Ordering::Acquire) {
            Err(GuardianError::ScopeClosed { operation })
        } else {
            Ok(())
        }
    }
}

impl Guardian for DefaultGuardian {
    fn check_state_access(&self) -> Result<(), GuardianError> {
        self.open("current_state")
    }

    fn check_state_update(&self) -> Result<(), GuardianError> {
        self.open("update_state")
    }

    fn check_side_job(&self) -> Result<(), GuardianError> {
        self.open("side_job")
    }

    fn check_post_event(&self) -> Result<(), GuardianError> {
        self.open("post_event")
    }

    fn check_no_op(&self) -> Result<(), GuardianError> {
        self.open("no_op")
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Requires side jobs to be the last operations of a handler.
///
/// Side job registration returns before the job runs; code after it that touches
/// state or posts events usually assumes otherwise.
#[derive(Debug, Default)]
pub struct SideJobsLastGuardian {
    base: DefaultGuardian,
    side_job_seen: AtomicBool,
}

impl SideJobsLastGuardian {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn before_side_jobs(&self, operation: &'static str) -> Result<(), GuardianError> {
        if self.side_job_seen.load(Ordering::Acquire) {
            Err(GuardianError::SideJobsMustBeLast { operation })
        } else {
            Ok(())
        }
    }
}

impl Guardian for SideJobsLastGuardian {
    fn check_state_access(&self) -> Result<(), GuardianError> {
        self.base.check_state_access()?;
        self.before_side_jobs("current_state")
    }

    fn check_state_update(&self) -> Result<(), GuardianError> {
        self.base.check_state_update()?;
        self.before_side_jobs("update_state")
    }

    fn check_side_job(&self) -> Result<(), GuardianError> {
        self.base.check_side_job()?;
        self.side_job_seen.store(true, Ordering::Release);
        Ok(())
    }

    fn check_post_event(&self) -> Result<(), GuardianError> {
        self.base.check_post_event()?;
        self.before_side_jobs("post_event")
    }

    fn check_no_op(&self) -> Result<(), GuardianError> {
        self.base.check_no_op()?;
        self.before_side_jobs("no_op")
    }

    fn close(&self) {
        self.base.close();
    }
}

/// Refuses state updates; delegates every other check to the wrapped guardian.
///
/// Used by the parallel strategy, where concurrent handlers would race on state writes.
/// Handlers that need to change state start a side job and write through
/// [`SideJobScope`](crate::SideJobScope), whose updates are single atomic swaps.
#[derive(Debug)]
pub struct ParallelGuardian<G = DefaultGuardian> {
    inner: G,
}

impl ParallelGuardian<DefaultGuardian> {
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(DefaultGuardian::new())
    }
}

impl Default for ParallelGuardian<DefaultGuardian> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Guardian> ParallelGuardian<G> {
    /// Wraps `inner`, adding the no-state-updates rule.
    #[must_use]
    pub fn wrap(inner: G) -> Self {
        Self { inner }
    }
}

impl<G: Guardian> Guardian for ParallelGuardian<G> {
    fn check_state_access(&self) -> Result<(), GuardianError> {
        self.inner.check_state_access()
    }

    fn check_state_update(&self) -> Result<(), GuardianError> {
        self.inner.check_state_update()?;
        Err(GuardianError::StateUpdateDisallowed {
            strategy: "parallel",
        })
    }

    fn check_side_job(&self) -> Result<(), GuardianError> {
        self.inner.check_side_job()
    }

    fn check_post_event(&self) -> Result<(), GuardianError> {
        self.inner.check_post_event()
    }

    fn check_no_op(&self) -> Result<(), GuardianError> {
        self.inner.check_no_op()
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_checks(g: &dyn Guardian) -> Vec<Result<(), GuardianError>> {
        vec![
            g.check_state_access(),
            g.check_state_update(),
            g.check_side_job(),
            g.check_post_event(),
            g.check_no_op(),
        ]
    }

    #[test]
    fn test_default_allows_everything_until_closed() {
        let g = DefaultGuardian::new();
        assert!(all_checks(&g).iter().all(Result::is_ok));

        g.close();
        for r in all_checks(&g) {
            assert!(matches!(r, Err(GuardianError::ScopeClosed { .. })));
        }
    }

    #[test]
    fn test_side_jobs_last_blocks_followups() {
        let g = SideJobsLastGuardian::new();
        g.check_state_update().unwrap();
        g.check_side_job().unwrap();
        g.check_side_job().unwrap();

        assert_eq!(
            g.check_state_update(),
            Err(GuardianError::SideJobsMustBeLast {
                operation: "update_state"
            })
        );
        assert!(g.check_post_event().is_err());
        assert!(g.check_state_access().is_err());
        assert!(g.check_no_op().is_err());
    }

    #[test]
    fn test_side_jobs_last_reports_closed_first() {
        let g = SideJobsLastGuardian::new();
        g.check_side_job().unwrap();
        g.close();
        assert!(matches!(
            g.check_post_event(),
            Err(GuardianError::ScopeClosed { .. })
        ));
    }

    #[test]
    fn test_parallel_refuses_updates_only() {
        let g = ParallelGuardian::new();
        assert_eq!(
            g.check_state_update(),
            Err(GuardianError::StateUpdateDisallowed {
                strategy: "parallel"
            })
        );
        g.check_state_access().unwrap();
        g.check_side_job().unwrap();
        g.check_post_event().unwrap();
        g.check_no_op().unwrap();
    }

    #[test]
    fn test_parallel_composes_with_side_jobs_last() {
        let g = ParallelGuardian::wrap(SideJobsLastGuardian::new());
        g.check_side_job().unwrap();
        assert!(matches!(
            g.check_post_event(),
            Err(GuardianError::SideJobsMustBeLast { .. })
        ));
    }
}

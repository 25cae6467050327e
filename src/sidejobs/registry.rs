//! # Side job registry: at most one live job per key.
//!
//! Start and cancel requests go through a queue and are applied one at a time by a
//! single request loop, so the map has one writer for registration. Jobs remove
//! their own entry when they end (matching by id, so a stale job never removes its
//! replacement).
//!
//! ```text
//! scope.side_job(key, block)
//!   ├─► id = next_id, restart = key used before? → SideJobQueued
//!   └─► [request queue] ─► loop:
//!          Start(job):
//!            ├─ take entry at key → cancel → await its end     (SideJobCancelled(old))
//!            └─ spawn job, insert entry                        (SideJobStarted(new))
//!          Cancel(key):
//!            └─ take entry at key → cancel → await its end
//!
//! job task:
//!   SideJobStarted → body(scope) raced against cancel
//!     ├─ Ok           ─► SideJobCompleted
//!     ├─ Err / panic  ─► SideJobError
//!     └─ cancelled    ─► SideJobCancelled
//!   remove own entry (if id still matches)
//! ```
//!
//! ## Rules
//! - The old job's terminal notification is published before the new job's `SideJobStarted`.
//! - Exactly one terminal notification per job; no entry outlives its task.
//! - Shutdown: stop requests, wait up to `grace` for jobs to finish, then force-cancel
//!   and wait (unbounded) for them to actually end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::machine::Core;
use crate::core::queue::{self, AdmissionQueue, QueueReceiver};
use crate::core::{Message, SideJobScope};
use crate::error::{HandlerError, MachineError};
use crate::notifications::{NotificationKind, SideJobRef};

use super::{RestartState, SideJobBody};

enum Request<I, E, S> {
    Start {
        job: SideJobRef,
        body: SideJobBody<I, E, S>,
    },
    Cancel {
        key: Arc<str>,
    },
}

/// Handle to a running side job.
struct Entry {
    id: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub(crate) struct Registry<I, E, S> {
    requests: AdmissionQueue<Request<I, E, S>>,
    rx: Mutex<Option<QueueReceiver<Request<I, E, S>>>>,
    jobs: Mutex<HashMap<Arc<str>, Entry>>,
    used: Mutex<HashSet<Arc<str>>>,
    next_id: AtomicU64,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl<I: Message, E: Message, S: Message> Registry<I, E, S> {
    /// Creates a registry whose jobs are cancelled together with `root`.
    pub(crate) fn new(root: &CancellationToken) -> Self {
        let (requests, rx) = queue::channel("side_jobs", 64);
        Self {
            requests,
            rx: Mutex::new(Some(rx)),
            jobs: Mutex::new(HashMap::new()),
            used: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            token: root.child_token(),
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<Arc<str>, Entry>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keys with a live job.
    pub(crate) fn running_keys(&self) -> Vec<Arc<str>> {
        let mut keys: Vec<_> = self.lock_jobs().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Takes the request loop for the caller to spawn. Returns `None` if it was already taken.
    pub(crate) fn request_loop(&self, core: &Arc<Core<I, E, S>>) -> Option<BoxFuture<'static, ()>> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let core = Arc::clone(core);

        Some(
            async move {
                while let Some(delivery) = rx.recv().await {
                    let (request, _done) = delivery.into_parts();
                    match request {
                        Request::Start { job, body } => core.side_jobs.launch(&core, job, body).await,
                        Request::Cancel { key } => core.side_jobs.stop(&key).await,
                    }
                }
            }
            .boxed(),
        )
    }

    /// Queues a start request at `key`.
    pub(crate) async fn request_start(
        &self,
        core: &Core<I, E, S>,
        key: Arc<str>,
        body: SideJobBody<I, E, S>,
    ) -> Result<SideJobRef, MachineError> {
        if self.requests.is_closed() {
            return Err(MachineError::SideJobsClosed);
        }
        let restart = {
            let mut used = self
                .used
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if used.insert(Arc::clone(&key)) {
                RestartState::Initial
            } else {
                RestartState::Restarted
            }
        };
        let job = SideJobRef {
            key,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            restart,
        };

        core.hub
            .notify(NotificationKind::SideJobQueued(job.clone()))
            .await;
        self.requests
            .enqueue(Request::Start {
                job: job.clone(),
                body,
            })
            .await
            .map_err(|_| MachineError::SideJobsClosed)?;
        Ok(job)
    }

    /// Cancels the job at `key`, if any.
    ///
    /// Goes through the request queue while it is open so it is ordered with starts;
    /// afterwards (during the grace period) the job is cancelled directly.
    pub(crate) async fn request_cancel(&self, key: Arc<str>) {
        match self.requests.enqueue(Request::Cancel { key }).await {
            Ok(()) => {}
            Err(rejected) => {
                if let Request::Cancel { key } = rejected.into_inner() {
                    self.stop(&key).await;
                }
            }
        }
    }

    async fn stop(&self, key: &str) {
        let entry = self.lock_jobs().remove(key);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            let _ = entry.join.await;
        }
    }

    async fn launch(&self, core: &Arc<Core<I, E, S>>, job: SideJobRef, body: SideJobBody<I, E, S>) {
        self.stop(&job.key).await;

        if self.token.is_cancelled() {
            core.hub
                .notify(NotificationKind::SideJobCancelled(job))
                .await;
            return;
        }

        let cancel = self.token.child_token();
        let fut = run_job(Arc::clone(core), job.clone(), body, cancel.clone());

        let mut jobs = self.lock_jobs();
        let join = match core.cfg.dispatchers.side_jobs.as_ref() {
            Some(handle) => self.tracker.spawn_on(fut, handle),
            None => self.tracker.spawn(fut),
        };
        jobs.insert(
            Arc::clone(&job.key),
            Entry {
                id: job.id,
                cancel,
                join,
            },
        );
    }

    fn remove_if_current(&self, key: &str, id: u64) {
        let mut jobs = self.lock_jobs();
        if jobs.get(key).is_some_and(|e| e.id == id) {
            jobs.remove(key);
        }
    }

    /// Two-phase shutdown: wait up to `grace`, then force-cancel and wait.
    pub(crate) async fn shut_down(&self, machine: &str, grace: Duration) {
        self.requests.close();
        self.requests.flush().await;
        self.tracker.close();

        if timeout(grace, self.tracker.wait()).await.is_err() {
            let keys = self.running_keys();
            tracing::warn!(
                machine,
                grace_ms = grace.as_millis() as u64,
                ?keys,
                "side jobs exceeded grace period, cancelling"
            );
            self.token.cancel();
            self.tracker.wait().await;
        }
    }

    /// Cancels every job and refuses further requests, without waiting.
    pub(crate) fn force_cancel(&self) {
        self.requests.force_close();
        self.tracker.close();
        self.token.cancel();
    }
}

async fn run_job<I: Message, E: Message, S: Message>(
    core: Arc<Core<I, E, S>>,
    job: SideJobRef,
    body: SideJobBody<I, E, S>,
    cancel: CancellationToken,
) {
    core.hub
        .notify(NotificationKind::SideJobStarted(job.clone()))
        .await;

    let scope = SideJobScope::new(Arc::clone(&core), job.clone(), cancel.clone());
    let fut = std::panic::AssertUnwindSafe(body(scope)).catch_unwind();

    let kind = tokio::select! {
        biased;
        _ = cancel.cancelled() => NotificationKind::SideJobCancelled(job.clone()),
        res = fut => match res {
            Ok(Ok(())) => NotificationKind::SideJobCompleted(job.clone()),
            Ok(Err(HandlerError::Cancelled)) => NotificationKind::SideJobCancelled(job.clone()),
            Ok(Err(error)) => NotificationKind::SideJobError { job: job.clone(), error },
            Err(panic) => NotificationKind::SideJobError {
                job: job.clone(),
                error: HandlerError::from_panic(panic),
            },
        },
    };

    core.side_jobs.remove_if_current(&job.key, job.id);
    core.hub.notify(kind).await;
}

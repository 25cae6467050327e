//! # Recorder: keep every notification of a machine
//!
//! Appends each [`Notification`] to an in-memory log and exposes typed views over it.
//!
//! ## Internal scheme
//! ```text
//! on_notification(n):
//!   ├─ log.push(n.clone())
//!   ├─ version += 1            (wakes wait_until)
//!   └─ if n is StatusChanged(Cleared) → cleared.cancel()   (wakes wait_for_cleared)
//!
//! successful_inputs() / cancelled_inputs() / states() / ...  → filtered copies of the log
//! ```
//!
//! Accessors are synchronous and take a short lock.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{InterceptorScope, Message, Status};
use crate::error::HandlerError;
use crate::interceptors::Interceptor;
use crate::notifications::{Notification, NotificationKind};

/// Records the full notification stream of one machine.
pub struct Recorder<I, E, S> {
    log: Mutex<Vec<Notification<I, E, S>>>,
    version: watch::Sender<usize>,
    cleared: CancellationToken,
    key: Option<&'static str>,
}

impl<I: Message, E: Message, S: Message> Recorder<I, E, S> {
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            log: Mutex::new(Vec::new()),
            version,
            cleared: CancellationToken::new(),
            key: None,
        }
    }

    /// Creates a recorder ready to be registered on a builder.
    #[must_use]
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers the recorder under `key` for [`Machine::interceptor`](crate::Machine::interceptor).
    #[must_use]
    pub fn with_key(mut self, key: &'static str) -> Self {
        self.key = Some(key);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification<I, E, S>>> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn collect<T>(&self, pick: impl Fn(&NotificationKind<I, E, S>) -> Option<T>) -> Vec<T> {
        self.lock().iter().filter_map(|n| pick(&n.kind)).collect()
    }

    /// Full notification log.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification<I, E, S>> {
        self.lock().clone()
    }

    /// Labels of every recorded notification, in order.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.collect(|k| Some(k.as_label()))
    }

    /// Number of recorded notifications with `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.lock()
            .iter()
            .filter(|n| n.kind.as_label() == label)
            .count()
    }

    /// Statuses in the order they were entered.
    #[must_use]
    pub fn statuses(&self) -> Vec<Status> {
        self.collect(|k| match k {
            NotificationKind::StatusChanged(s) => Some(*s),
            _ => None,
        })
    }

    /// Inputs whose handler returned normally.
    #[must_use]
    pub fn successful_inputs(&self) -> Vec<I> {
        self.collect(|k| match k {
            NotificationKind::InputHandledSuccessfully(i) => Some(i.clone()),
            _ => None,
        })
    }

    /// Inputs accepted by the strategy, in acceptance order.
    #[must_use]
    pub fn accepted_inputs(&self) -> Vec<I> {
        self.collect(|k| match k {
            NotificationKind::InputAccepted(i) => Some(i.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn cancelled_inputs(&self) -> Vec<I> {
        self.collect(|k| match k {
            NotificationKind::InputCancelled(i) => Some(i.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn rejected_inputs(&self) -> Vec<I> {
        self.collect(|k| match k {
            NotificationKind::InputRejected(i) => Some(i.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn dropped_inputs(&self) -> Vec<I> {
        self.collect(|k| match k {
            NotificationKind::InputDropped(i) => Some(i.clone()),
            _ => None,
        })
    }

    /// Inputs whose handler failed, with the captured error.
    #[must_use]
    pub fn errored_inputs(&self) -> Vec<(I, HandlerError)> {
        self.collect(|k| match k {
            NotificationKind::InputHandlerError { input, error } => {
                Some((input.clone(), error.clone()))
            }
            _ => None,
        })
    }

    #[must_use]
    pub fn emitted_events(&self) -> Vec<E> {
        self.collect(|k| match k {
            NotificationKind::EventEmitted(e) => Some(e.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn handled_events(&self) -> Vec<E> {
        self.collect(|k| match k {
            NotificationKind::EventHandledSuccessfully(e) => Some(e.clone()),
            _ => None,
        })
    }

    /// Events whose handler failed, with the captured error.
    #[must_use]
    pub fn errored_events(&self) -> Vec<(E, HandlerError)> {
        self.collect(|k| match k {
            NotificationKind::EventHandlerError { event, error } => {
                Some((event.clone(), error.clone()))
            }
            _ => None,
        })
    }

    /// Every value published through `StateChanged`, in order.
    #[must_use]
    pub fn states(&self) -> Vec<S> {
        self.collect(|k| match k {
            NotificationKind::StateChanged(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Keys of side jobs that started and have not ended yet (sorted).
    #[must_use]
    pub fn running_side_jobs(&self) -> Vec<Arc<str>> {
        let mut live: BTreeSet<(Arc<str>, u64)> = BTreeSet::new();
        for n in self.lock().iter() {
            match &n.kind {
                NotificationKind::SideJobStarted(job) => {
                    live.insert((Arc::clone(&job.key), job.id));
                }
                NotificationKind::SideJobCompleted(job)
                | NotificationKind::SideJobCancelled(job)
                | NotificationKind::SideJobError { job, .. } => {
                    live.remove(&(Arc::clone(&job.key), job.id));
                }
                _ => {}
            }
        }
        live.into_iter().map(|(key, _)| key).collect()
    }

    /// Captured `UnhandledError`s.
    #[must_use]
    pub fn unhandled_errors(&self) -> Vec<HandlerError> {
        self.collect(|k| match k {
            NotificationKind::UnhandledError { error } => Some(error.clone()),
            _ => None,
        })
    }

    /// True once the terminal `StatusChanged(Cleared)` was recorded.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.cleared.is_cancelled()
    }

    /// Waits for the terminal `StatusChanged(Cleared)` notification.
    pub async fn wait_for_cleared(&self) {
        self.cleared.cancelled().await;
    }

    /// Waits until `pred` holds for the recorded log.
    pub async fn wait_until(&self, pred: impl Fn(&[Notification<I, E, S>]) -> bool) {
        let mut rx = self.version.subscribe();
        loop {
            if pred(&self.lock()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until at least `n` notifications with `label` were recorded.
    pub async fn wait_for_count(&self, label: &str, n: usize) {
        self.wait_until(|log| log.iter().filter(|x| x.kind.as_label() == label).count() >= n)
            .await;
    }
}

impl<I: Message, E: Message, S: Message> Default for Recorder<I, E, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: Message, E: Message, S: Message> Interceptor<I, E, S> for Recorder<I, E, S> {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    fn key(&self) -> Option<&'static str> {
        self.key
    }

    async fn on_notification(&self, _scope: &InterceptorScope<I, E, S>, n: &Notification<I, E, S>) {
        self.lock().push(n.clone());
        self.version.send_modify(|v| *v += 1);
        if n.kind.is_cleared() {
            self.cleared.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::SideJobRef;
    use crate::sidejobs::RestartState;

    type Rec = Recorder<u8, &'static str, u32>;

    fn n(kind: NotificationKind<u8, &'static str, u32>) -> Notification<u8, &'static str, u32> {
        Notification::new("test", kind)
    }

    fn push(rec: &Rec, kind: NotificationKind<u8, &'static str, u32>) {
        rec.lock().push(n(kind));
    }

    #[test]
    fn test_views_filter_by_kind() {
        let rec = Rec::new();
        push(&rec, NotificationKind::InputAccepted(1));
        push(&rec, NotificationKind::InputCancelled(1));
        push(&rec, NotificationKind::InputAccepted(2));
        push(&rec, NotificationKind::StateChanged(10));
        push(&rec, NotificationKind::InputHandledSuccessfully(2));
        push(&rec, NotificationKind::EventHandledSuccessfully("nav"));

        assert_eq!(rec.accepted_inputs(), vec![1, 2]);
        assert_eq!(rec.cancelled_inputs(), vec![1]);
        assert_eq!(rec.successful_inputs(), vec![2]);
        assert_eq!(rec.states(), vec![10]);
        assert_eq!(rec.handled_events(), vec!["nav"]);
        assert_eq!(rec.count("input_accepted"), 2);
    }

    #[test]
    fn test_running_side_jobs_tracks_ids() {
        let rec = Rec::new();
        let job = |id| SideJobRef {
            key: "sync".into(),
            id,
            restart: RestartState::Initial,
        };
        push(&rec, NotificationKind::SideJobStarted(job(1)));
        push(&rec, NotificationKind::SideJobCancelled(job(1)));
        push(&rec, NotificationKind::SideJobStarted(job(2)));
        assert_eq!(rec.running_side_jobs(), vec![Arc::<str>::from("sync")]);

        push(&rec, NotificationKind::SideJobCompleted(job(2)));
        assert!(rec.running_side_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_wakes_on_new_notification() {
        let rec = Arc::new(Rec::new());
        let waiter = {
            let rec = Arc::clone(&rec);
            tokio::spawn(async move { rec.wait_for_count("input_queued", 1).await })
        };
        tokio::task::yield_now().await;

        rec.lock().push(n(NotificationKind::InputQueued(5)));
        rec.version.send_modify(|v| *v += 1);
        waiter.await.unwrap();
    }
}

//! # InterceptorSet: isolated fan-out over multiple interceptors
//!
//! ## What it guarantees
//! - Every interceptor subscribes to the hub *before* the notification pump starts,
//!   so none misses the early `StatusChanged(Running)` / initial `StateChanged`.
//! - Per-interceptor order equals notification order.
//! - Panics inside interceptors are caught and logged (isolation).
//!
//! ## What it does **not** guarantee
//! - No lockstep between interceptors; each progresses at its own pace.
//! - No replay for an interceptor that lagged behind the broadcast capacity.
//!
//! ## Diagram
//! ```text
//!   hub broadcast
//!        ├──► [cursor I1] ─► worker I1 ─► on_start() → on_notification() ...
//!        ├──► [cursor I2] ─► worker I2 ─► on_start() → on_notification() ...
//!        └──► [cursor IN] ─► worker IN ─► on_start() ✗ → InterceptorFailed, stop
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::machine::Core;
use crate::core::{InterceptorScope, Message, spawn_on};
use crate::error::HandlerError;
use crate::notifications::{Notification, NotificationKind};

use super::InterceptorRef;

/// Registered interceptors of one machine.
pub(crate) struct InterceptorSet<I, E, S> {
    items: Vec<InterceptorRef<I, E, S>>,
}

impl<I: Message, E: Message, S: Message> InterceptorSet<I, E, S> {
    pub(crate) fn new(items: Vec<InterceptorRef<I, E, S>>) -> Self {
        Self { items }
    }

    /// Interceptor registered under `key`, if any.
    pub(crate) fn find(&self, key: &str) -> Option<InterceptorRef<I, E, S>> {
        self.items
            .iter()
            .find(|it| it.key() == Some(key))
            .map(Arc::clone)
    }

    /// Subscribes every interceptor and spawns its worker.
    ///
    /// Call once, before the hub's pump is started.
    pub(crate) fn spawn_workers(&self, core: &Arc<Core<I, E, S>>) -> Vec<JoinHandle<()>> {
        let rt = core.cfg.dispatchers.interceptors.clone();
        let mut workers = Vec::with_capacity(self.items.len());

        for interceptor in &self.items {
            let Some(rx) = core.hub.subscribe() else {
                tracing::warn!(
                    machine = %core.name,
                    interceptor = interceptor.name(),
                    "notification hub already closed, interceptor not started"
                );
                continue;
            };
            let core = Arc::clone(core);
            let interceptor = Arc::clone(interceptor);
            workers.push(spawn_on(rt.as_ref(), worker(core, interceptor, rx)));
        }
        workers
    }
}

async fn worker<I: Message, E: Message, S: Message>(
    core: Arc<Core<I, E, S>>,
    interceptor: InterceptorRef<I, E, S>,
    mut rx: broadcast::Receiver<Notification<I, E, S>>,
) {
    let name = interceptor.name();
    let scope = InterceptorScope::new(Arc::clone(&core), name);

    let setup = std::panic::AssertUnwindSafe(interceptor.on_start(&scope))
        .catch_unwind()
        .await;
    let setup = match setup {
        Ok(res) => res,
        Err(panic) => Err(HandlerError::from_panic(panic)),
    };
    if let Err(error) = setup {
        tracing::warn!(machine = %core.name, interceptor = name, %error, "interceptor setup failed");
        core.hub
            .notify(NotificationKind::InterceptorFailed { name, error })
            .await;
        return;
    }
    core.hub
        .notify(NotificationKind::InterceptorAttached { name })
        .await;

    loop {
        match rx.recv().await {
            Ok(n) => {
                let fut = interceptor.on_notification(&scope, &n);
                if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    let error = HandlerError::from_panic(panic);
                    tracing::error!(
                        machine = %core.name,
                        interceptor = name,
                        kind = n.kind.as_label(),
                        %error,
                        "interceptor panicked"
                    );
                }
                if n.kind.is_cleared() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    machine = %core.name,
                    interceptor = name,
                    skipped,
                    "interceptor lagged behind, notifications skipped"
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

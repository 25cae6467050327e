//! # Core interceptor trait
//!
//! `Interceptor` is the extension point for observing a machine. Each interceptor is
//! driven by a dedicated worker fed by an independent broadcast cursor owned by the
//! `InterceptorSet`.
//!
//! ## Contract
//! - [`on_start`](Interceptor::on_start) runs once, before any notification is delivered.
//!   An `Err` (or panic) is reported as `InterceptorFailed` and the interceptor is not
//!   run any further; other interceptors are unaffected.
//! - [`on_notification`](Interceptor::on_notification) is called in notification order.
//!   It may be slow; if it falls behind by more than the broadcast capacity, the
//!   oldest notifications are skipped for this interceptor (warn).
//! - Delivery ends after the terminal `StatusChanged(Cleared)` notification.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{InterceptorScope, Message};
use crate::error::HandlerError;
use crate::notifications::Notification;

/// Shared handle to an interceptor.
pub type InterceptorRef<I, E, S> = Arc<dyn Interceptor<I, E, S>>;

/// Contract for notification observers.
#[async_trait]
pub trait Interceptor<I: Message, E: Message, S: Message>: Send + Sync + 'static {
    /// Human-readable name (for logs and `InterceptorAttached` / `InterceptorFailed`).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Lookup key for [`Machine::interceptor`](crate::Machine::interceptor).
    fn key(&self) -> Option<&'static str> {
        None
    }

    /// One-time setup. The scope stays valid for the interceptor's whole lifetime.
    async fn on_start(&self, scope: &InterceptorScope<I, E, S>) -> Result<(), HandlerError> {
        let _ = scope;
        Ok(())
    }

    /// Handles a single notification.
    async fn on_notification(&self, scope: &InterceptorScope<I, E, S>, notification: &Notification<I, E, S>);
}

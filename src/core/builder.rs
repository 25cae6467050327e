use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::machine::{Core, CoreParts};
use crate::core::{Machine, MachineConfig, Message};
use crate::handlers::{EventHandler, EventHandlerRef, InputHandler, InputHandlerRef};
use crate::interceptors::{Interceptor, InterceptorRef};
use crate::strategies::{InputStrategy, LifoStrategy};

/// Builder for constructing a [`Machine`].
///
/// Defaults: [`MachineConfig::default`], LIFO without rollback, no interceptors,
/// no event handler, a fresh root cancellation token.
pub struct MachineBuilder<I, E, S> {
    cfg: MachineConfig,
    initial: S,
    handler: InputHandlerRef<I, E, S>,
    strategy: Option<Arc<dyn InputStrategy<I, E, S>>>,
    interceptors: Vec<InterceptorRef<I, E, S>>,
    event_handler: Option<EventHandlerRef<I, E, S>>,
    parent: Option<CancellationToken>,
}

impl<I: Message, E: Message, S: Message> MachineBuilder<I, E, S> {
    /// Creates a builder with the initial state and the input handler.
    pub fn new<H>(initial: S, handler: H) -> Self
    where
        H: InputHandler<I, E, S>,
    {
        Self {
            cfg: MachineConfig::default(),
            initial,
            handler: Arc::new(handler),
            strategy: None,
            interceptors: Vec::new(),
            event_handler: None,
            parent: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, cfg: MachineConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets the machine name used in notifications and logs.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.cfg.name = name.into();
        self
    }

    /// Sets the default grace period of graceful shutdown.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.cfg.grace = grace;
        self
    }

    /// Sets the input strategy.
    pub fn with_strategy<T>(mut self, strategy: T) -> Self
    where
        T: InputStrategy<I, E, S>,
    {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Adds one interceptor. Keep a clone of the `Arc` to inspect it later.
    pub fn with_interceptor<T>(mut self, interceptor: Arc<T>) -> Self
    where
        T: Interceptor<I, E, S>,
    {
        self.interceptors.push(interceptor);
        self
    }

    /// Adds several interceptors.
    pub fn with_interceptors(mut self, interceptors: Vec<InterceptorRef<I, E, S>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Attaches `handler` to the event pipeline at start.
    pub fn with_event_handler<H>(mut self, handler: H) -> Self
    where
        H: EventHandler<I, E, S>,
    {
        self.event_handler = Some(Arc::new(handler));
        self
    }

    /// Ties the machine's lifetime to `parent`: cancelling it tears the machine down.
    pub fn with_parent_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Builds the machine. Nothing runs until [`Machine::start`].
    pub fn build(self) -> Machine<I, E, S> {
        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(LifoStrategy::<I, S>::new()) as Arc<dyn InputStrategy<I, E, S>>);

        Machine::from_core(Core::new(CoreParts {
            cfg: self.cfg,
            initial: self.initial,
            strategy,
            handler: self.handler,
            interceptors: self.interceptors,
            event_handler: self.event_handler,
            parent: self.parent,
        }))
    }
}

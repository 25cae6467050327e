//! # statevisor
//!
//! **Statevisor** is a Model-View-Intent state machine runtime for tokio.
//!
//! All mutations of one piece of state go through a single pipeline fed by discrete
//! *inputs*. A pluggable [`InputStrategy`] decides ordering, cancellation and
//! concurrency; handlers may escape into keyed, cancellable *side jobs* for I/O and
//! emit one-shot *events* to a separately paced consumer. Every lifecycle transition
//! is published as a [`Notification`] to any number of [`Interceptor`]s.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Machine::send(input)        SideJobScope::post_input     InterceptorScope::restore_state
//!          │                              │                              │
//!          ▼                              ▼                              ▼
//! ┌───────────────────────────────────────────────────────────────────────────────────┐
//! │  main queue (AdmissionQueue<Queued>)                                              │
//! └──────────────────────────────────────┬────────────────────────────────────────────┘
//!                                         ▼
//!                     InputStrategy::process (FIFO / LIFO / Parallel)
//!                                         │  InputRunner::run(item, token)
//!                                         ▼
//!                     InputHandler::handle(HandlerScope, input)   ◄── Guardian checks
//!            ┌────────────────────────────┼─────────────────────────────┐
//!            ▼                            ▼                             ▼
//!     StateStore (CAS)          event queue ─► EventHandler    side job registry
//!   (StateChanged, watch)      (one attached handler)          (≤ 1 live job per key)
//!            │                            │                             │
//!            └──────────── every step ────┴──────── notifies ───────────┘
//!                                         ▼
//!                  notification queue ─► pump ─► broadcast
//!                                   ┌─────────┼─────────┐
//!                                   ▼         ▼         ▼
//!                            interceptor1 interceptor2 subscribe()
//! ```
//!
//! ### Lifecycle
//! ```text
//! NotStarted ──start()──► Running ──shut_down_gracefully()──► ShuttingDown{..} ──► Cleared
//!                            └──────────────── cancel() / parent token ─────────────┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                  |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------------------|
//! | **Machine**       | Lifecycle, posting inputs, observing state, shutdown.        | [`Machine`], [`MachineBuilder`], [`StateObserver`]  |
//! | **Strategies**    | Scheduling and cancellation of inputs.                       | [`FifoStrategy`], [`LifoStrategy`], [`ParallelStrategy`] |
//! | **Guardians**     | Per-invocation legality checks.                              | [`Guardian`], [`SideJobsLastGuardian`]              |
//! | **Handlers**      | User logic for inputs and events.                            | [`InputHandler`], [`EventHandler`], [`InputHandlerFn`] |
//! | **Observability** | Notification stream and observers.                           | [`Notification`], [`Interceptor`], [`Recorder`]     |
//! | **Errors**        | Typed errors for the runtime, guardians and handlers.        | [`MachineError`], [`GuardianError`], [`HandlerError`] |
//! | **Configuration** | Capacities, grace period, execution contexts.                | [`MachineConfig`], [`Dispatchers`]                  |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogInterceptor`] (one `tracing` event per notification).
//!
//! ## Example
//! ```rust
//! use statevisor::{FifoStrategy, HandlerScope, InputHandlerFn, Machine, Recorder};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum Input {
//!     Increment,
//!     Decrement,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let recorder = Recorder::<Input, (), i64>::arc();
//!
//!     let handler = InputHandlerFn::new(|scope: HandlerScope<Input, (), i64>, input: Input| async move {
//!         match input {
//!             Input::Increment => scope.update_state(|n| n + 1).await,
//!             Input::Decrement => scope.update_state(|n| n - 1).await,
//!         }
//!     });
//!
//!     let machine = Machine::builder(0i64, handler)
//!         .with_name("counter")
//!         .with_strategy(FifoStrategy::new())
//!         .with_interceptor(recorder.clone())
//!         .build();
//!
//!     machine.start().await?;
//!     machine.send(Input::Increment).await?;
//!     machine.send(Input::Increment).await?;
//!     machine.send(Input::Decrement).await?;
//!     machine.shut_down_gracefully().await?;
//!
//!     assert_eq!(machine.current_state(), 1);
//!     assert_eq!(
//!         recorder.successful_inputs(),
//!         vec![Input::Increment, Input::Increment, Input::Decrement]
//!     );
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod handlers;
mod interceptors;
mod notifications;
mod sidejobs;
mod strategies;

// ---- Public re-exports ----

pub use crate::core::{
    Completion, Delivery, Dispatchers, EventHandlerScope, HandlerScope, InputRunner, InputSender,
    InterceptorScope, Machine, MachineBuilder, MachineConfig, Message, QueueReceiver, Queued,
    Rejected, SideJobScope, StateObserver, Status,
};
pub use error::{GuardianError, HandlerError, MachineError};
pub use events::EventHandlerAttachment;
pub use handlers::{
    EventHandler, EventHandlerFn, EventHandlerRef, InputHandler, InputHandlerFn, InputHandlerRef,
};
pub use interceptors::{Interceptor, InterceptorRef, Recorder};
pub use notifications::{Notification, NotificationKind, SideJobRef};
pub use sidejobs::RestartState;
pub use strategies::{
    DefaultGuardian, FifoStrategy, FilterDecision, Guardian, GuardianFactory, InputStrategy,
    LifoStrategy, ParallelGuardian, ParallelStrategy, SideJobsLastGuardian,
};

// Optional: expose the tracing-backed logging interceptor.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use interceptors::LogInterceptor;

//! # Example: counter
//!
//! A FIFO counter that autosaves through a side job and announces changes as events.
//!
//! Shows how to:
//! - Build a machine with [`FifoStrategy`] and a function-backed handler
//! - Escape into a keyed side job that posts an input back
//! - Consume one-shot events with an attached event handler
//! - Log every notification with [`LogInterceptor`] and `tracing-subscriber`
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► Increment ×3 ──► StateChanged(1, 2, 3) + Toast events
//!   │     └─► side job "autosave" (restarted by every increment)
//!   │           └─► after 200ms posts Saved(n)
//!   └─► shut_down_gracefully()
//!         ├─► waits for "autosave" to post Saved(3)
//!         ├─► drains inputs and events
//!         └─► Cleared
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example counter --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use statevisor::{
    EventHandlerFn, EventHandlerScope, FifoStrategy, HandlerError, HandlerScope, InputHandlerFn,
    LogInterceptor, Machine, Recorder,
};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, PartialEq)]
enum Input {
    Increment,
    Saved(u32),
}

#[derive(Clone, Debug, PartialEq)]
enum Event {
    Toast(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Counter {
    value: u32,
    saved: Option<u32>,
}

type Scope = HandlerScope<Input, Event, Counter>;

async fn handle(scope: Scope, input: Input) -> Result<(), HandlerError> {
    match input {
        Input::Increment => {
            let next = scope
                .update_state_and_get(|c| Counter {
                    value: c.value + 1,
                    ..c.clone()
                })
                .await?;
            scope
                .post_event(Event::Toast(format!("counter is now {}", next.value)))
                .await?;

            let value = next.value;
            scope
                .side_job("autosave", move |job| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    job.post_input(Input::Saved(value)).await?;
                    Ok(())
                })
                .await?;
            Ok(())
        }
        Input::Saved(value) => {
            scope
                .update_state(|c| Counter {
                    saved: Some(value),
                    ..c.clone()
                })
                .await
        }
    }
}

async fn toast(_scope: EventHandlerScope<Input, Event, Counter>, event: Event) -> Result<(), HandlerError> {
    let Event::Toast(text) = event;
    println!("[toast] {text}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let recorder = Recorder::<Input, Event, Counter>::arc();
    let machine = Machine::builder(Counter::default(), InputHandlerFn::new(handle))
        .with_name("counter")
        .with_strategy(FifoStrategy::new())
        .with_interceptor(Arc::new(LogInterceptor::new()))
        .with_interceptor(Arc::clone(&recorder))
        .with_event_handler(EventHandlerFn::new(toast))
        .with_grace(Duration::from_secs(1))
        .build();

    machine.start().await?;
    for _ in 0..3 {
        machine.send(Input::Increment).await?;
    }
    machine.shut_down_gracefully().await?;

    let state = machine.current_state();
    println!();
    println!("Final state:");
    println!(" ├─► value: {}", state.value);
    println!(" ├─► saved: {:?}", state.saved);
    println!(" └─► notifications: {}", recorder.notifications().len());
    Ok(())
}

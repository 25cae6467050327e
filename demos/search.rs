//! # Example: search
//!
//! Type-ahead search on a LIFO machine: every keystroke cancels the lookup in flight.
//!
//! Shows how to:
//! - Use [`LifoStrategy`] with rollback so a cancelled lookup leaves no `loading` flag behind
//! - Drop repeated queries with a LIFO admission filter
//! - Observe state changes with [`StateObserver`](statevisor::StateObserver)
//!
//! ## Flow
//! ```text
//! "r" ─► "ru" ─► "rus" ─► "rus" (dropped by filter) ─► "rust"
//!  │       │       │                                     └─► lookup completes: 2 hits
//!  └───────┴───────┴─► cancelled, state rolled back to the admission snapshot
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example search
//! ```

use std::time::Duration;

use statevisor::{FilterDecision, HandlerError, HandlerScope, InputHandlerFn, LifoStrategy, Machine, Recorder};

const CATALOG: &[&str] = &["rust", "rustup", "ruby", "python", "go"];

#[derive(Clone, Debug, PartialEq)]
struct Query(String);

#[derive(Clone, Debug, Default, PartialEq)]
struct Search {
    query: String,
    loading: bool,
    hits: Vec<&'static str>,
}

async fn lookup(scope: HandlerScope<Query, (), Search>, Query(query): Query) -> Result<(), HandlerError> {
    let q = query.clone();
    scope
        .update_state(move |s| Search {
            query: q.clone(),
            loading: true,
            hits: s.hits.clone(),
        })
        .await?;

    // Pretend to call a backend.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let hits: Vec<_> = CATALOG
        .iter()
        .copied()
        .filter(|item| item.starts_with(query.as_str()) && query.len() > 2)
        .collect();

    scope
        .update_state(move |_| Search {
            query: query.clone(),
            loading: false,
            hits: hits.clone(),
        })
        .await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let strategy = LifoStrategy::new()
        .with_rollback(true)
        .with_filter(|state: &Search, Query(q): &Query| {
            if state.query == *q {
                FilterDecision::Drop
            } else {
                FilterDecision::Accept
            }
        });

    let recorder = Recorder::<Query, (), Search>::arc();
    let machine = Machine::builder(Search::default(), InputHandlerFn::new(lookup))
        .with_name("search")
        .with_strategy(strategy)
        .with_interceptor(recorder.clone())
        .build();

    let mut observer = machine.observe_states();
    let printer = tokio::spawn(async move {
        while let Some(state) = observer.changed().await {
            println!(" ├─► {:<6} loading={:<5} hits={:?}", state.query, state.loading, state.hits);
        }
        println!(" └─► observer closed");
    });

    machine.start().await?;
    for q in ["r", "ru", "rus", "rus", "rust"] {
        machine.send(Query(q.to_string())).await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    machine.shut_down_gracefully().await?;
    printer.await?;

    println!();
    println!("Cancelled: {:?}", recorder.cancelled_inputs());
    println!("Rejected:  {:?}", recorder.rejected_inputs());
    println!("Final:     {:?}", machine.current_state());
    Ok(())
}

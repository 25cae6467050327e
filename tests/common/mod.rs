#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use statevisor::{
    HandlerError, HandlerScope, InputHandlerFn, InputStrategy, Machine, MachineBuilder, Recorder,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Increment,
    Decrement,
    /// Sleeps, then increments.
    SlowIncrement,
    /// Increments `n` times with a pause after each, then waits.
    Steps(u32),
    Fail,
    Panic,
    Noop,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct State {
    pub count: i64,
}

impl State {
    pub fn new(count: i64) -> Self {
        Self { count }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Toast(String),
    Boom,
}

pub type Scope = HandlerScope<Input, Event, State>;
pub type Rec = Recorder<Input, Event, State>;

pub async fn counter(scope: Scope, input: Input) -> Result<(), HandlerError> {
    match input {
        Input::Increment => scope.update_state(|s| State::new(s.count + 1)).await,
        Input::Decrement => scope.update_state(|s| State::new(s.count - 1)).await,
        Input::SlowIncrement => {
            tokio::time::sleep(Duration::from_millis(100)).await;
            scope.update_state(|s| State::new(s.count + 1)).await
        }
        Input::Steps(n) => {
            for _ in 0..n {
                scope.update_state(|s| State::new(s.count + 1)).await?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        Input::Fail => Err(HandlerError::fail("boom")),
        Input::Panic => panic!("handler exploded"),
        Input::Noop => scope.no_op(),
    }
}

/// Counter machine with a recorder attached.
pub fn counter_machine<T>(strategy: T) -> (Machine<Input, Event, State>, Arc<Rec>)
where
    T: InputStrategy<Input, Event, State>,
{
    let rec = Rec::arc();
    let machine = builder()
        .with_strategy(strategy)
        .with_interceptor(Arc::clone(&rec))
        .build();
    (machine, rec)
}

pub fn builder() -> MachineBuilder<Input, Event, State> {
    Machine::builder(State::default(), InputHandlerFn::new(counter)).with_name("test")
}

/// Index of the first notification with `label` satisfying `pred`.
pub fn position(rec: &Rec, pred: impl Fn(&statevisor::NotificationKind<Input, Event, State>) -> bool) -> Option<usize> {
    rec.notifications().iter().position(|n| pred(&n.kind))
}

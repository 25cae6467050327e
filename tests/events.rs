mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Event, Input, Rec, State};
use statevisor::{
    EventHandlerFn, EventHandlerScope, FifoStrategy, HandlerError, HandlerScope, InputHandlerFn,
    Machine, MachineConfig, MachineError, NotificationKind,
};

type Scope = HandlerScope<Input, Event, State>;
type EventScope = EventHandlerScope<Input, Event, State>;

/// `Increment` bumps the counter and announces it; `Fail` emits `Boom`.
async fn announcer(scope: Scope, input: Input) -> Result<(), HandlerError> {
    match input {
        Input::Increment => {
            let next = scope.update_state_and_get(|s| State::new(s.count + 1)).await?;
            scope.post_event(Event::Toast(format!("count={}", next.count))).await
        }
        Input::Fail => scope.post_event(Event::Boom).await,
        Input::Decrement => scope.update_state(|s| State::new(s.count - 1)).await,
        _ => scope.no_op(),
    }
}

async fn toast(_scope: EventScope, event: Event) -> Result<(), HandlerError> {
    match event {
        Event::Toast(_) => Ok(()),
        Event::Boom => Err(HandlerError::fail("cannot render")),
    }
}

fn machine() -> (Machine<Input, Event, State>, Arc<Rec>) {
    let rec = Rec::arc();
    let machine = Machine::builder(State::default(), InputHandlerFn::new(announcer))
        .with_strategy(FifoStrategy::new())
        .with_interceptor(rec.clone())
        .with_grace(Duration::from_millis(100))
        .build();
    (machine, rec)
}

#[tokio::test(start_paused = true)]
async fn test_failing_event_does_not_stop_pipeline() {
    let (machine, rec) = machine();
    machine.start().await.unwrap();
    let _attachment = machine.attach_event_handler(EventHandlerFn::new(toast)).unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.send(Input::Fail).await.unwrap();
    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(
        rec.handled_events(),
        vec![
            Event::Toast("count=1".into()),
            Event::Toast("count=2".into())
        ]
    );
    assert_eq!(
        rec.errored_events(),
        vec![(Event::Boom, HandlerError::fail("cannot render"))]
    );
    assert_eq!(rec.emitted_events().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_emission_lifecycle() {
    let (machine, rec) = machine();
    machine.start().await.unwrap();
    let _attachment = machine.attach_event_handler(EventHandlerFn::new(toast)).unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    let is_toast = |k: &NotificationKind<Input, Event, State>| k.event() == Some(&Event::Toast("count=1".into()));
    let labels: Vec<_> = rec
        .notifications()
        .into_iter()
        .filter(|n| is_toast(&n.kind))
        .map(|n| n.kind.as_label())
        .collect();
    assert_eq!(
        labels,
        vec!["event_queued", "event_emitted", "event_handled_successfully"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_event_handler_is_refused() {
    let (machine, _rec) = machine();
    machine.start().await.unwrap();

    let _first = machine.attach_event_handler(EventHandlerFn::new(toast)).unwrap();
    let second = machine.attach_event_handler(EventHandlerFn::new(toast));
    assert_eq!(second.unwrap_err(), MachineError::EventHandlerAttached);

    machine.shut_down_gracefully().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_detached_queue_is_resumed_by_next_handler() {
    let (machine, rec) = machine();
    machine.start().await.unwrap();

    let first = machine.attach_event_handler(EventHandlerFn::new(toast)).unwrap();
    machine.send_and_await(Input::Increment).await.unwrap();
    rec.wait_for_count("event_handled_successfully", 1).await;
    first.detach().await;

    machine.send_and_await(Input::Increment).await.unwrap();
    assert_eq!(rec.count("event_emitted"), 1);

    let _second = machine.attach_event_handler(EventHandlerFn::new(toast)).unwrap();
    rec.wait_for_count("event_handled_successfully", 2).await;
    assert_eq!(rec.count("event_processing_started"), 2);
    assert_eq!(rec.count("event_processing_stopped"), 1);

    machine.shut_down_gracefully().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_event_handler_can_post_inputs() {
    let rec = Rec::arc();
    let handler = EventHandlerFn::new(|scope: EventScope, event: Event| async move {
        if let Event::Toast(_) = event {
            scope.post_input(Input::Decrement).await?;
        }
        Ok::<(), HandlerError>(())
    });
    let machine = Machine::builder(State::default(), InputHandlerFn::new(announcer))
        .with_strategy(FifoStrategy::new())
        .with_interceptor(rec.clone())
        .with_event_handler(handler)
        .build();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    rec.wait_until(|log| {
        log.iter()
            .any(|n| matches!(&n.kind, NotificationKind::InputHandledSuccessfully(Input::Decrement)))
    })
    .await;
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.states(), vec![State::new(0), State::new(1), State::new(0)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_handler_gives_up_on_events_after_grace() {
    let (machine, rec) = machine();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    let started = tokio::time::Instant::now();
    machine.shut_down_gracefully().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(rec.count("event_queued"), 1);
    assert_eq!(rec.count("event_emitted"), 0);
    assert!(rec.is_cleared());
}

#[tokio::test(start_paused = true)]
async fn test_full_event_queue_holds_back_handlers_without_losing_events() {
    let rec = Rec::arc();
    let slow = EventHandlerFn::new(|_scope: EventScope, _event: Event| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<(), HandlerError>(())
    });
    let machine = Machine::builder(State::default(), InputHandlerFn::new(announcer))
        .with_config(MachineConfig {
            event_capacity: 1,
            ..MachineConfig::default()
        })
        .with_strategy(FifoStrategy::new())
        .with_event_handler(slow)
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    for _ in 0..25 {
        machine.send(Input::Increment).await.unwrap();
    }
    rec.wait_for_count("event_handled_successfully", 25).await;
    machine.shut_down_gracefully().await.unwrap();

    let expected: Vec<_> = (1..=25).map(|n| Event::Toast(format!("count={n}"))).collect();
    assert_eq!(rec.handled_events(), expected);
    assert!(rec.errored_events().is_empty());
    assert!(rec.errored_inputs().is_empty());

    // Inputs could only run a couple of events ahead of the slow handler.
    let log = rec.notifications();
    let last_input = log
        .iter()
        .rposition(|n| matches!(n.kind, NotificationKind::InputHandledSuccessfully(_)))
        .unwrap();
    let handled_before = log[..last_input]
        .iter()
        .filter(|n| matches!(n.kind, NotificationKind::EventHandledSuccessfully(_)))
        .count();
    assert!(handled_before >= 20, "only {handled_before} events handled before the last input");
}

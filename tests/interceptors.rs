mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{Event, Input, Rec, State, builder};
use statevisor::{
    FifoStrategy, HandlerError, Interceptor, InterceptorScope, Notification, NotificationKind,
};

type Scope = InterceptorScope<Input, Event, State>;
type Note = Notification<Input, Event, State>;

struct Broken;

#[async_trait]
impl Interceptor<Input, Event, State> for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn on_start(&self, _scope: &Scope) -> Result<(), HandlerError> {
        Err(HandlerError::fail("no sink configured"))
    }

    async fn on_notification(&self, _scope: &Scope, _n: &Note) {
        unreachable!("failed interceptors receive nothing");
    }
}

/// Panics on every notification after counting it.
#[derive(Default)]
struct Flaky {
    seen: AtomicUsize,
}

#[async_trait]
impl Interceptor<Input, Event, State> for Flaky {
    async fn on_notification(&self, _scope: &Scope, _n: &Note) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        panic!("flaky interceptor");
    }
}

/// Restores a persisted state during setup.
struct Hydrator;

#[async_trait]
impl Interceptor<Input, Event, State> for Hydrator {
    fn name(&self) -> &'static str {
        "hydrator"
    }

    async fn on_start(&self, scope: &Scope) -> Result<(), HandlerError> {
        scope.restore_state_and_await(State::new(42)).await?;
        Ok(())
    }

    async fn on_notification(&self, _scope: &Scope, _n: &Note) {}
}

/// Posts `Decrement` whenever it sees an `Increment` succeed.
struct Echo;

#[async_trait]
impl Interceptor<Input, Event, State> for Echo {
    async fn on_notification(&self, scope: &Scope, n: &Note) {
        if let NotificationKind::InputHandledSuccessfully(Input::Increment) = n.kind {
            let _ = scope.post_input(Input::Decrement).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_setup_is_isolated() {
    let rec = Rec::arc();
    let machine = builder()
        .with_strategy(FifoStrategy::new())
        .with_interceptor(Arc::new(Broken))
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();
    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    let failed: Vec<_> = rec
        .notifications()
        .into_iter()
        .filter_map(|n| match n.kind {
            NotificationKind::InterceptorFailed { name, error } => Some((name, error)),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![("broken", HandlerError::fail("no sink configured"))]);
    assert_eq!(rec.count("interceptor_attached"), 1);
    assert_eq!(rec.successful_inputs(), vec![Input::Increment]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_interceptor_keeps_receiving() {
    let flaky = Arc::new(Flaky::default());
    let rec = Rec::arc();
    let machine = builder()
        .with_strategy(FifoStrategy::new())
        .with_interceptor(flaky.clone())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();
    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert!(flaky.seen.load(Ordering::SeqCst) > 1);
    assert_eq!(rec.successful_inputs(), vec![Input::Increment]);
}

#[tokio::test(start_paused = true)]
async fn test_interceptor_restores_state_on_start() {
    let rec = Rec::arc();
    let machine = builder()
        .with_strategy(FifoStrategy::new())
        .with_interceptor(Arc::new(Hydrator))
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();
    rec.wait_for_count("state_restored", 1).await;

    machine.send_and_await(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(machine.current_state(), State::new(43));
}

#[tokio::test(start_paused = true)]
async fn test_interceptor_posts_inputs() {
    let rec = Rec::arc();
    let machine = builder()
        .with_strategy(FifoStrategy::new())
        .with_interceptor(Arc::new(Echo))
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    rec.wait_until(|log| {
        log.iter()
            .any(|n| matches!(n.kind, NotificationKind::InputHandledSuccessfully(Input::Decrement)))
    })
    .await;
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(machine.current_state(), State::new(0));
}

#[tokio::test(start_paused = true)]
async fn test_lookup_by_key() {
    let rec = Arc::new(Rec::new().with_key("recorder"));
    let machine = builder()
        .with_strategy(FifoStrategy::new())
        .with_interceptor(rec.clone())
        .build();

    assert!(machine.interceptor("recorder").is_some());
    assert!(machine.interceptor("missing").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_sees_live_notifications() {
    let machine = builder().with_strategy(FifoStrategy::new()).build();
    machine.start().await.unwrap();
    let mut rx = machine.subscribe().expect("stream open while running");

    machine.send(Input::Increment).await.unwrap();
    loop {
        let n = rx.recv().await.unwrap();
        if let NotificationKind::InputHandledSuccessfully(input) = n.kind {
            assert_eq!(input, Input::Increment);
            break;
        }
    }
    machine.shut_down_gracefully().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    assert!(machine.subscribe().is_none());
}

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Input, State, counter_machine};
use statevisor::{
    FifoStrategy, FilterDecision, GuardianError, HandlerError, HandlerScope, InputHandlerFn,
    LifoStrategy, Machine, NotificationKind, ParallelStrategy, Recorder, SideJobScope,
    SideJobsLastGuardian, Status,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_fifo_counter_applies_every_input_in_order() {
    let (machine, rec) = counter_machine(FifoStrategy::new());
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.send(Input::Increment).await.unwrap();
    machine.send(Input::Decrement).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(machine.current_state(), State::new(1));
    assert_eq!(
        rec.successful_inputs(),
        vec![Input::Increment, Input::Increment, Input::Decrement]
    );
    assert_eq!(machine.status(), Status::Cleared);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_never_overlaps_handlers() {
    let (machine, rec) = counter_machine(FifoStrategy::new());
    machine.start().await.unwrap();

    for input in [Input::SlowIncrement, Input::Increment, Input::SlowIncrement] {
        machine.send(input).await.unwrap();
    }
    machine.shut_down_gracefully().await.unwrap();

    // Each Accepted is followed by that input's terminal notification before the next Accepted.
    let mut in_flight = 0;
    for n in rec.notifications() {
        match n.kind {
            NotificationKind::InputAccepted(_) => {
                in_flight += 1;
                assert_eq!(in_flight, 1, "two inputs in flight under FIFO");
            }
            NotificationKind::InputHandledSuccessfully(_)
            | NotificationKind::InputCancelled(_)
            | NotificationKind::InputHandlerError { .. } => in_flight -= 1,
            _ => {}
        }
    }
    assert_eq!(
        rec.accepted_inputs(),
        vec![Input::SlowIncrement, Input::Increment, Input::SlowIncrement]
    );
    assert_eq!(machine.current_state(), State::new(3));
}

#[tokio::test(start_paused = true)]
async fn test_lifo_newer_input_cancels_slow_one() {
    let (machine, rec) = counter_machine(LifoStrategy::new());
    machine.start().await.unwrap();

    machine.send(Input::SlowIncrement).await.unwrap();
    rec.wait_for_count("input_accepted", 1).await;
    machine.send(Input::Decrement).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.cancelled_inputs(), vec![Input::SlowIncrement]);
    assert_eq!(rec.successful_inputs(), vec![Input::Decrement]);
    assert_eq!(machine.current_state(), State::new(-1));
}

#[tokio::test(start_paused = true)]
async fn test_lifo_burst_only_last_input_succeeds() {
    let (machine, rec) = counter_machine(LifoStrategy::new());
    machine.start().await.unwrap();

    for _ in 0..5 {
        machine.send(Input::SlowIncrement).await.unwrap();
    }
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.successful_inputs(), vec![Input::SlowIncrement]);
    assert_eq!(rec.cancelled_inputs().len(), rec.accepted_inputs().len() - 1);
    assert_eq!(machine.current_state(), State::new(1));
}

#[tokio::test(start_paused = true)]
async fn test_lifo_rollback_restores_snapshot() {
    let (machine, rec) = counter_machine(LifoStrategy::new().with_rollback(true));
    machine.start().await.unwrap();

    machine.send(Input::Steps(3)).await.unwrap();
    rec.wait_until(|log| {
        log.iter()
            .any(|n| matches!(n.kind, NotificationKind::StateChanged(State { count: 3 })))
    })
    .await;
    machine.send(Input::Noop).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.cancelled_inputs(), vec![Input::Steps(3)]);
    assert_eq!(
        rec.states(),
        vec![
            State::new(0),
            State::new(1),
            State::new(2),
            State::new(3),
            State::new(0)
        ]
    );
    assert_eq!(machine.current_state(), State::new(0));
}

#[tokio::test(start_paused = true)]
async fn test_lifo_without_rollback_keeps_partial_writes() {
    let (machine, rec) = counter_machine(LifoStrategy::new());
    machine.start().await.unwrap();

    machine.send(Input::Steps(2)).await.unwrap();
    rec.wait_until(|log| {
        log.iter()
            .any(|n| matches!(n.kind, NotificationKind::StateChanged(State { count: 2 })))
    })
    .await;
    machine.send(Input::Noop).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(machine.current_state(), State::new(2));
}

#[tokio::test(start_paused = true)]
async fn test_lifo_filter_drop_rejects_without_cancelling() {
    let strategy = LifoStrategy::new().with_filter(|_state: &State, input: &Input| {
        if *input == Input::Noop {
            FilterDecision::Drop
        } else {
            FilterDecision::Accept
        }
    });
    let (machine, rec) = counter_machine(strategy);
    machine.start().await.unwrap();

    machine.send(Input::SlowIncrement).await.unwrap();
    rec.wait_for_count("input_accepted", 1).await;
    machine.send(Input::Noop).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.rejected_inputs(), vec![Input::Noop]);
    assert!(rec.cancelled_inputs().is_empty());
    assert_eq!(rec.successful_inputs(), vec![Input::SlowIncrement]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_runs_inputs_concurrently() {
    let rec = Recorder::<Input, (), State>::arc();
    let handler = InputHandlerFn::new(|scope: HandlerScope<Input, (), State>, _input: Input| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        scope.no_op()
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(ParallelStrategy::new())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        machine.send(Input::Noop).await.unwrap();
    }
    rec.wait_for_count("input_handled_successfully", 3).await;
    assert!(started.elapsed() < Duration::from_millis(200));

    machine.shut_down_gracefully().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_parallel_guardian_refuses_state_updates() {
    let rec = Recorder::<Input, (), State>::arc();
    let handler = InputHandlerFn::new(|scope: HandlerScope<Input, (), State>, _input: Input| async move {
        // The refusal is recorded even when the handler swallows it.
        let _ = scope.update_state(|s| State::new(s.count + 1)).await;
        Ok::<(), HandlerError>(())
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(ParallelStrategy::new())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    let errors = rec.errored_inputs();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].1,
        HandlerError::Guardian(GuardianError::StateUpdateDisallowed {
            strategy: "parallel"
        })
    );
    assert!(rec.successful_inputs().is_empty());
    assert_eq!(machine.current_state(), State::new(0));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_handlers_change_state_through_side_jobs() {
    let rec = Recorder::<Input, (), State>::arc();
    let handler = InputHandlerFn::new(|scope: HandlerScope<Input, (), State>, input: Input| async move {
        let Input::Steps(n) = input else {
            return scope.no_op();
        };
        scope
            .side_job(format!("bump-{n}"), move |job: SideJobScope<Input, (), State>| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                job.update_state_and_get(|s| State::new(s.count + i64::from(n)))
                    .await?;
                Ok::<(), HandlerError>(())
            })
            .await?;
        Ok(())
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(ParallelStrategy::new())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    for n in 1..=3 {
        machine.send(Input::Steps(n)).await.unwrap();
    }
    rec.wait_for_count("side_job_completed", 3).await;
    machine.shut_down_gracefully().await.unwrap();

    assert!(rec.errored_inputs().is_empty());
    assert_eq!(rec.successful_inputs().len(), 3);
    assert_eq!(machine.current_state(), State::new(6));
    assert_eq!(rec.states().last(), Some(&State::new(6)));
    assert_eq!(rec.count("state_changed"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_side_job_writes_report_the_value_they_wrote() {
    let rec = Recorder::<Input, (), State>::arc();
    let olds = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&olds);
    let handler = InputHandlerFn::new(move |scope: HandlerScope<Input, (), State>, input: Input| {
        let seen = Arc::clone(&seen);
        async move {
            let Input::Steps(n) = input else {
                return scope.no_op();
            };
            scope
                .side_job(format!("bump-{n}"), move |job: SideJobScope<Input, (), State>| async move {
                    let old = job.get_and_update_state(|s| State::new(s.count + 1)).await?;
                    seen.lock().unwrap().push(old.count);
                    Ok::<(), HandlerError>(())
                })
                .await?;
            Ok(())
        }
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(ParallelStrategy::new())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    for n in 0..5 {
        machine.send(Input::Steps(n)).await.unwrap();
    }
    rec.wait_for_count("side_job_completed", 5).await;
    machine.shut_down_gracefully().await.unwrap();

    let mut olds = olds.lock().unwrap().clone();
    olds.sort_unstable();
    assert_eq!(olds, vec![0, 1, 2, 3, 4]);

    // Skip the initial snapshot; every write reports a distinct new value.
    let mut written: Vec<i64> = rec.states().iter().skip(1).map(|s| s.count).collect();
    written.sort_unstable();
    assert_eq!(written, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_get_and_update_state_returns_old_and_reports_new() {
    let rec = Recorder::<Input, (), State>::arc();
    let olds = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&olds);
    let handler = InputHandlerFn::new(move |scope: HandlerScope<Input, (), State>, _input: Input| {
        let seen = Arc::clone(&seen);
        async move {
            let old = scope.get_and_update_state(|s| State::new(s.count + 10)).await?;
            seen.lock().unwrap().push(old);
            Ok::<(), HandlerError>(())
        }
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(FifoStrategy::new())
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(*olds.lock().unwrap(), vec![State::new(0), State::new(10)]);
    assert_eq!(
        rec.states(),
        vec![State::new(0), State::new(10), State::new(20)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_side_jobs_last_guardian_flags_late_state_update() {
    let rec = Recorder::<Input, (), State>::arc();
    let handler = InputHandlerFn::new(|scope: HandlerScope<Input, (), State>, _input: Input| async move {
        scope.side_job("sync", |_job| async move { Ok(()) }).await?;
        scope.update_state(|s| State::new(s.count + 1)).await
    });
    let machine = Machine::builder(State::default(), handler)
        .with_strategy(FifoStrategy::new().with_guardian(SideJobsLastGuardian::new))
        .with_interceptor(rec.clone())
        .build();
    machine.start().await.unwrap();

    machine.send(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    let errors = rec.errored_inputs();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0].1,
        HandlerError::Guardian(GuardianError::SideJobsMustBeLast { .. })
    ));
    assert_eq!(machine.current_state(), State::new(0));
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_keeps_machine_running() {
    let (machine, rec) = counter_machine(FifoStrategy::new());
    machine.start().await.unwrap();

    machine.send_and_await(Input::Fail).await.unwrap();
    assert_eq!(machine.status(), Status::Running);
    machine.send_and_await(Input::Panic).await.unwrap();
    machine.send_and_await(Input::Increment).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    let errors = rec.errored_inputs();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0], (Input::Fail, HandlerError::fail("boom")));
    assert!(matches!(errors[1].1, HandlerError::Panicked { .. }));
    assert_eq!(rec.successful_inputs(), vec![Input::Increment]);
    assert_eq!(machine.current_state(), State::new(1));
}

#[tokio::test(start_paused = true)]
async fn test_no_op_succeeds_without_state_change() {
    let (machine, rec) = counter_machine(FifoStrategy::new());
    machine.start().await.unwrap();

    machine.send_and_await(Input::Noop).await.unwrap();
    machine.shut_down_gracefully().await.unwrap();

    assert_eq!(rec.successful_inputs(), vec![Input::Noop]);
    assert_eq!(rec.states(), vec![State::new(0)]);
}

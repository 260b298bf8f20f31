// src/resilience/tests/drain_tests.rs

use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, OpError};
use crate::resilience::{Completion, ConnectionState, OperationQueue, PendingOperation};
use crate::storage::{Operation, Response};

use super::utils::{drainer_for, memory_handle};

fn submit(queue: &OperationQueue, op: Operation) -> Completion {
    let (pending, completion) = PendingOperation::new(op);
    queue.enqueue(pending).unwrap();
    completion
}

fn write(path: &str) -> Operation {
    Operation::write(path, path.as_bytes().to_vec())
}

#[tokio::test]
async fn test_drain_runs_operations_in_order() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, stats) = drainer_for(&handle, 10, 2);

    let completions: Vec<Completion> = ["a", "b", "c"]
        .iter()
        .map(|path| submit(&queue, write(path)))
        .collect();

    let report = drainer.drain(&CancellationToken::new()).await;

    assert_eq!(report.succeeded, 3);
    assert!(!report.interrupted);
    assert!(queue.is_idle());
    assert_eq!(
        connector.store().journal(),
        vec!["write:a", "write:b", "write:c"]
    );
    for completion in completions {
        assert_eq!(completion.await.unwrap(), Response::Written);
    }
    assert_eq!(stats.succeeded(), 3);
}

#[tokio::test]
async fn test_permanent_failure_completes_and_moves_on() {
    let (handle, _connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, stats) = drainer_for(&handle, 10, 10);

    let missing = submit(&queue, Operation::update("missing", b"x".to_vec()));
    let next = submit(&queue, write("b"));

    let report = drainer.drain(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);

    match missing.await {
        Err(ClientError::Operation(err)) => assert_eq!(err, OpError::not_found("missing")),
        other => panic!("expected permanent failure, got {:?}", other),
    }
    assert_eq!(next.await.unwrap(), Response::Written);
    assert_eq!(stats.failed(), 1);
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_parks_operation_and_degrades() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, _stats) = drainer_for(&handle, 10, 10);

    let completions: Vec<Completion> = ["a", "b", "c"]
        .iter()
        .map(|path| submit(&queue, write(path)))
        .collect();
    connector
        .store()
        .fail_next(OpError::transient("connection reset"));

    let report = drainer.drain_once(&CancellationToken::new()).await;

    // "a" is parked, the untouched rest of the batch is back at the head
    assert_eq!(report.requeued, 1);
    assert!(report.interrupted);
    assert_eq!(queue.parked(), 1);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.in_flight(), 0);
    assert_eq!(handle.state(), ConnectionState::Degraded);

    // Work submitted after the failure
    let late = submit(&queue, write("d"));

    handle.connect().await.unwrap();
    time::advance(Duration::from_millis(10)).await;
    let report = drainer.drain(&CancellationToken::new()).await;
    assert_eq!(report.succeeded, 4);

    assert_eq!(
        connector.store().journal(),
        vec!["write:b", "write:c", "write:d", "write:a"]
    );
    for completion in completions {
        assert_eq!(completion.await.unwrap(), Response::Written);
    }
    assert_eq!(late.await.unwrap(), Response::Written);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_hint_stretches_backoff() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, _stats) = drainer_for(&handle, 10, 10);

    let _completion = submit(&queue, write("a"));
    connector.store().fail_next(OpError::rate_limited(
        "slow down",
        Some(Duration::from_millis(500)),
    ));
    let started = Instant::now();

    let report = drainer.drain_once(&CancellationToken::new()).await;

    assert_eq!(report.requeued, 1);
    // Throttling is not an outage
    assert_eq!(handle.state(), ConnectionState::Connected);
    // The hint (500ms) beats the policy delay (10ms)
    assert_eq!(queue.next_due(), Some(started + Duration::from_millis(500)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_fails_the_operation() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, stats) = drainer_for(&handle, 10, 10);

    let completion = submit(&queue, write("a"));
    // One more failure than the three-retry budget allows
    for _ in 0..4 {
        connector
            .store()
            .fail_next(OpError::rate_limited("slow down", None));
    }

    for _ in 0..4 {
        drainer.drain(&CancellationToken::new()).await;
        time::advance(Duration::from_millis(100)).await;
    }

    match completion.await {
        Err(ClientError::ResourceExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 4);
            assert_eq!(last_error, OpError::rate_limited("slow down", None));
        }
        other => panic!("expected exhausted budget, got {:?}", other),
    }
    assert!(queue.is_idle());
    assert_eq!(stats.retried(), 3);
    assert!(connector.store().journal().is_empty());
}

#[tokio::test]
async fn test_drain_without_session_touches_nothing() {
    let (handle, connector) = memory_handle();
    let (drainer, queue, _stats) = drainer_for(&handle, 10, 10);
    let _completion = submit(&queue, write("a"));

    let report = drainer.drain_once(&CancellationToken::new()).await;

    assert!(report.interrupted);
    assert_eq!(report.settled(), 0);
    assert_eq!(queue.len(), 1);
    assert_eq!(connector.store().call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_drain_leaves_queue_intact() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (drainer, queue, _stats) = drainer_for(&handle, 10, 10);
    let _completion = submit(&queue, write("a"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = drainer.drain(&cancel).await;

    assert!(report.interrupted);
    assert_eq!(queue.len(), 1);
    assert_eq!(connector.store().call_count(), 0);
}

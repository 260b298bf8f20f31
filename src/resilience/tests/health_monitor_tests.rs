// src/resilience/tests/health_monitor_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::OpError;
use crate::resilience::{
    Completion, ConnectionHandle, ConnectionState, HealthCheckConfig, HealthMonitor,
    OperationQueue, PendingOperation,
};
use crate::storage::{Operation, Response};

use super::utils::{drainer_for, memory_handle};

fn monitor_for(
    handle: &Arc<ConnectionHandle>,
    check_interval: Duration,
) -> (HealthMonitor, Arc<OperationQueue>) {
    let (drainer, queue, _stats) = drainer_for(handle, 10, 10);
    let monitor = HealthMonitor::new(
        Arc::clone(handle),
        drainer,
        HealthCheckConfig {
            check_interval,
            probe_timeout: Duration::from_millis(100),
        },
        CancellationToken::new(),
    );
    (monitor, queue)
}

fn submit(queue: &OperationQueue, path: &str) -> Completion {
    let (pending, completion) =
        PendingOperation::new(Operation::write(path, path.as_bytes().to_vec()));
    queue.enqueue(pending).unwrap();
    completion
}

#[test]
fn test_default_config() {
    let config = HealthCheckConfig::default();
    assert_eq!(config.check_interval, Duration::from_secs(5));
    assert_eq!(config.probe_timeout, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_outage_and_drains() {
    let (handle, connector) = memory_handle();
    connector.store().set_available(false);
    let (monitor, queue) = monitor_for(&handle, Duration::from_secs(1));

    let first = submit(&queue, "a");
    let second = submit(&queue, "b");
    let task = monitor.start();

    // Several failed reconnects while the store is down
    time::sleep(Duration::from_millis(2500)).await;
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert_eq!(queue.len(), 2);
    assert!(connector.connect_count() > 2);

    // Next tick after recovery reconnects and drains
    connector.store().set_available(true);
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(connector.store().journal(), vec!["write:a", "write:b"]);
    assert_eq!(first.await.unwrap(), Response::Written);
    assert_eq!(second.await.unwrap(), Response::Written);

    monitor.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_degrades_then_recovers() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (monitor, _queue) = monitor_for(&handle, Duration::from_secs(1));
    let task = monitor.start();

    connector.store().set_available(false);
    time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handle.state(), ConnectionState::Degraded);

    connector.store().set_available(true);
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(handle.sessions_opened(), 2);

    monitor.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wake_drains_between_ticks() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (monitor, queue) = monitor_for(&handle, Duration::from_secs(60));
    let task = monitor.start();

    // Past the immediate first tick
    time::sleep(Duration::from_millis(1)).await;

    let completion = submit(&queue, "a");
    monitor.waker().notify_one();

    assert_eq!(completion.await.unwrap(), Response::Written);
    assert_eq!(connector.store().journal(), vec!["write:a"]);

    monitor.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_parked_retry_runs_when_due() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (monitor, queue) = monitor_for(&handle, Duration::from_secs(60));
    let task = monitor.start();
    time::sleep(Duration::from_millis(1)).await;

    connector
        .store()
        .fail_next(OpError::rate_limited("slow down", None));
    let completion = submit(&queue, "a");
    monitor.waker().notify_one();

    // First attempt is throttled; the retry fires long before the next tick
    let outcome = time::timeout(Duration::from_secs(1), completion).await;
    assert_eq!(outcome.unwrap().unwrap(), Response::Written);
    assert_eq!(connector.store().call_count(), 2);

    monitor.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_due_retry_waits_for_reconnect_while_degraded() {
    let (handle, connector) = memory_handle();
    handle.connect().await.unwrap();
    let (monitor, queue) = monitor_for(&handle, Duration::from_secs(1));
    let task = monitor.start();
    time::sleep(Duration::from_millis(1)).await;
    let calls = connector.store().call_count();

    connector
        .store()
        .fail_next(OpError::transient("connection reset"));
    let completion = submit(&queue, "a");
    monitor.waker().notify_one();

    // The retry came due long ago, but nothing runs on a degraded session
    // and the clock keeps moving
    time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.state(), ConnectionState::Degraded);
    assert_eq!(queue.parked(), 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(connector.store().call_count(), calls + 1);

    // The next tick reconnects and runs it
    time::sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(completion.await.unwrap(), Response::Written);
    assert_eq!(connector.store().journal(), vec!["write:a"]);
    assert!(queue.is_idle());

    monitor.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_the_task() {
    let (handle, _connector) = memory_handle();
    let (monitor, _queue) = monitor_for(&handle, Duration::from_secs(1));
    let task = monitor.start();

    monitor.stop();
    time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

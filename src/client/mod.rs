// src/client/mod.rs
//! The public face of the crate.
//!
//! A [`ManagedClient`] composes one [`ConnectionHandle`], a [`RetryPolicy`]
//! and an [`OperationQueue`]:
//!
//! ```plaintext
//!   read/write/update/delete ──► retry loop ──► ConnectionHandle ──► RemoteStore
//!                                                    ▲
//!   submit_async ──► OperationQueue ──► Drainer ─────┘
//!                         ▲                ▲
//!                         └── HealthMonitor (probe, reconnect, drain)
//! ```
//!
//! Synchronous calls never touch the queue: they either succeed, fail
//! permanently, or come back `Unavailable`. Asynchronous submissions are
//! buffered and resolve through their [`Completion`] or callback.

mod registry;

#[cfg(test)]
mod tests;

pub use registry::{global, install_global, ClientRegistry, ConnectorFactory};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, ShutdownPolicy};
use crate::error::{ClientError, ErrorKind, Result};
use crate::resilience::{
    Completion, ConnectionHandle, ConnectionState, Drainer, HealthCheckConfig, HealthMonitor,
    JitterSource, OperationQueue, PendingOperation, RandomJitter, RetryPolicy,
};
use crate::stats::{ClientStats, StatsRecorder};
use crate::storage::{Connector, Operation, Response};

/// Builder for [`ManagedClient`]
pub struct ManagedClientBuilder {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    jitter: Option<Arc<dyn JitterSource>>,
}

impl ManagedClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the jitter source shared by both retry budgets
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn build(self) -> Result<ManagedClient> {
        ManagedClient::new(self.connector, self.config, self.jitter)
    }
}

/// Resilient client over a remote document store
pub struct ManagedClient {
    config: ClientConfig,
    connection: Arc<ConnectionHandle>,
    queue: Arc<OperationQueue>,
    policy: RetryPolicy,
    drainer: Drainer,
    monitor: HealthMonitor,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
    stats: Arc<StatsRecorder>,
    /// false once shutdown has begun; submissions hold the read side
    accepting: RwLock<bool>,
    /// aborts synchronous retry loops
    ops_cancel: CancellationToken,
    /// aborts connect attempts
    connection_cancel: CancellationToken,
}

impl std::fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("connection", &self.connection)
            .field("queued", &self.queue.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ManagedClient {
    pub fn builder(connector: Arc<dyn Connector>) -> ManagedClientBuilder {
        ManagedClientBuilder {
            connector,
            config: ClientConfig::default(),
            jitter: None,
        }
    }

    fn new(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        jitter: Option<Arc<dyn JitterSource>>,
    ) -> Result<Self> {
        config.validate()?;

        let jitter = jitter.unwrap_or_else(|| Arc::new(RandomJitter));
        let policy = RetryPolicy::with_jitter(config.retry.clone(), Arc::clone(&jitter));
        let connect_policy = RetryPolicy::with_jitter(config.connect_retry.clone(), jitter);

        let connection_cancel = CancellationToken::new();
        let connection = Arc::new(ConnectionHandle::with_cancel(
            connector,
            connect_policy,
            connection_cancel.clone(),
        ));
        let queue = Arc::new(OperationQueue::new(config.queue_capacity));
        let stats = Arc::new(StatsRecorder::default());

        let drainer = Drainer::new(
            Arc::clone(&connection),
            Arc::clone(&queue),
            policy.clone(),
            config.drain_batch_size,
            Arc::clone(&stats),
        );
        let monitor = HealthMonitor::new(
            Arc::clone(&connection),
            drainer.clone(),
            HealthCheckConfig {
                check_interval: config.health_check_interval,
                probe_timeout: config.probe_timeout,
            },
            CancellationToken::new(),
        );
        let wake = monitor.waker();

        Ok(Self {
            config,
            connection,
            queue,
            policy,
            drainer,
            monitor,
            monitor_task: Mutex::new(None),
            wake,
            stats,
            accepting: RwLock::new(true),
            ops_cancel: CancellationToken::new(),
            connection_cancel,
        })
    }

    /// Attempt the first connection and start the health monitor.
    ///
    /// A failed first connection is not fatal: the client starts disconnected,
    /// buffers asynchronous work and the monitor keeps trying.
    pub async fn start(&self) {
        if !self.is_accepting() {
            return;
        }

        if let Err(e) = self.connection.connect().await {
            warn!(error = %e, "Initial connection failed, starting disconnected");
        }

        let mut task = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            *task = Some(self.monitor.start());
            debug!(
                interval_ms = self.config.health_check_interval.as_millis() as u64,
                "Health monitor started"
            );
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            state: self.connection.state(),
            queued: self.queue.len(),
            parked: self.queue.parked(),
            in_flight: self.queue.in_flight(),
            queue_capacity: self.queue.capacity(),
            succeeded: self.stats.succeeded(),
            failed: self.stats.failed(),
            retried: self.stats.retried(),
            rejected: self.stats.rejected(),
            sessions_opened: self.connection.sessions_opened(),
        }
    }

    fn is_accepting(&self) -> bool {
        *self.accepting.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.execute(Operation::read(path))
            .await
            .map(Response::into_document)
    }

    pub async fn write(&self, path: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.execute(Operation::write(path, payload)).await.map(|_| ())
    }

    /// Replace an existing document; a missing one is a permanent failure
    pub async fn update(&self, path: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.execute(Operation::update(path, payload)).await.map(|_| ())
    }

    /// Returns whether the document existed
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let response = self.execute(Operation::delete(path)).await?;
        Ok(matches!(response, Response::Deleted(true)))
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.read(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.write(path, payload).await
    }

    pub async fn update_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.update(path, payload).await
    }

    /// Run `op` now, retrying transient failures. Never enqueues.
    pub async fn execute(&self, op: Operation) -> Result<Response> {
        self.execute_with_cancel(op, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), aborting between attempts when
    /// `cancel` fires or the configured operation timeout passes.
    pub async fn execute_with_cancel(
        &self,
        op: Operation,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if !self.is_accepting() {
            return Err(ClientError::Shutdown);
        }

        let deadline = self.config.operation_timeout.map(|t| Instant::now() + t);
        let mut attempts: u32 = 0;
        let mut last_error = None;

        loop {
            if cancel.is_cancelled() || self.ops_cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ClientError::Cancelled);
            }
            if !self.connection.is_healthy() {
                self.stats.record_failure();
                return Err(ClientError::Unavailable {
                    attempts,
                    last_error,
                });
            }

            attempts += 1;
            let err = match self.connection.execute(&op).await {
                Ok(response) => {
                    self.stats.record_success();
                    return Ok(response);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            if kind == ErrorKind::Permanent {
                self.stats.record_failure();
                return Err(ClientError::Operation(err));
            }

            let decision = self.policy.decide(attempts, kind);
            if !decision.should_retry {
                if kind == ErrorKind::Transient {
                    self.connection.mark_degraded(&err.to_string());
                }
                error!(
                    operation = %op.kind(),
                    path = op.path(),
                    attempts,
                    error = %err,
                    "Retry budget exhausted"
                );
                self.stats.record_failure();
                return Err(ClientError::Unavailable {
                    attempts,
                    last_error: Some(err),
                });
            }

            let delay = decision.delay.max(err.retry_after().unwrap_or_default());
            debug!(
                operation = %op.kind(),
                path = op.path(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying operation"
            );
            self.stats.record_retry();
            last_error = Some(err);

            let deadline_reached = async {
                match deadline {
                    Some(d) => time::sleep_until(d).await,
                    None => future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = self.ops_cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = deadline_reached => return Err(ClientError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }

    /// Queue `op` for the background drain task.
    ///
    /// Fails immediately with `QueueFull` when the queue is at capacity. The
    /// returned future resolves once the operation succeeds or fails for good.
    pub fn submit_async(&self, op: Operation) -> Result<Completion> {
        let accepting = self.accepting.read().unwrap_or_else(PoisonError::into_inner);
        if !*accepting {
            return Err(ClientError::Shutdown);
        }

        let (pending, completion) = PendingOperation::new(op);
        self.enqueue(pending)?;
        Ok(completion)
    }

    /// Like [`submit_async`](Self::submit_async), reporting through `callback`.
    ///
    /// The callback is not invoked when submission itself fails.
    pub fn submit_with_callback<F>(&self, op: Operation, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let accepting = self.accepting.read().unwrap_or_else(PoisonError::into_inner);
        if !*accepting {
            return Err(ClientError::Shutdown);
        }

        self.enqueue(PendingOperation::with_callback(op, callback))
    }

    fn enqueue(&self, pending: PendingOperation) -> Result<()> {
        let id = pending.id();
        match self.queue.enqueue(pending) {
            Ok(()) => {
                debug!(%id, queued = self.queue.len(), "Operation enqueued");
                self.wake.notify_one();
                Ok(())
            }
            Err(e) => {
                warn!(capacity = e.capacity, "Operation queue full, rejecting submission");
                self.stats.record_rejection();
                Err(e.into())
            }
        }
    }

    /// Stop the client.
    ///
    /// Stops the monitor, then drains or discards queued work according to
    /// `shutdown_policy`, then disconnects. Operations still queued at the end
    /// complete with `ClientError::Shutdown`. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        {
            let mut accepting = self.accepting.write().unwrap_or_else(PoisonError::into_inner);
            if !*accepting {
                debug!("Client already shut down");
                return;
            }
            *accepting = false;
        }

        info!(
            policy = ?self.config.shutdown_policy,
            queued = self.queue.len(),
            "Shutting down managed client"
        );
        self.ops_cancel.cancel();
        // one budget covers stopping the monitor and the drain
        let deadline = Instant::now() + self.config.shutdown_timeout;

        self.monitor.stop();
        let task = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            if time::timeout_at(deadline, &mut task)
                .await
                .is_err()
            {
                warn!("Health monitor did not stop in time, cancelling connect");
                self.connection_cancel.cancel();
                let _ = task.await;
            }
        }

        if self.config.shutdown_policy == ShutdownPolicy::Drain {
            self.drain_for_shutdown(deadline).await;
        }

        let leftovers = self.queue.drain_all();
        if !leftovers.is_empty() {
            warn!(count = leftovers.len(), "Discarding queued operations");
        }
        for op in leftovers {
            op.complete(Err(ClientError::Shutdown));
            self.stats.record_failure();
        }

        self.connection_cancel.cancel();
        self.connection.disconnect().await;
        info!("Managed client shut down");
    }

    /// Best-effort drain that gives up at `deadline`
    async fn drain_for_shutdown(&self, deadline: Instant) {
        let stop = CancellationToken::new();
        let timer = {
            let stop = stop.clone();
            tokio::spawn(async move {
                time::sleep_until(deadline).await;
                stop.cancel();
            })
        };

        loop {
            if stop.is_cancelled() || self.queue.is_idle() {
                break;
            }
            if self.queue.is_empty() {
                // only parked retries left; wait for the earliest
                let Some(at) = self.queue.next_due() else { break };
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = time::sleep_until(at) => continue,
                }
            }
            if !self.connection.is_healthy() {
                let connected = tokio::select! {
                    _ = stop.cancelled() => false,
                    outcome = self.connection.connect() => outcome.is_ok(),
                };
                if !connected {
                    break;
                }
            }
            self.drainer.drain(&stop).await;
        }

        if !self.queue.is_idle() {
            warn!(
                remaining = self.queue.occupied(),
                "Shutdown drain stopped with work outstanding"
            );
        }
        timer.abort();
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        // the monitor only holds the connection and queue, so stop it explicitly
        self.monitor.stop();
        self.connection_cancel.cancel();
    }
}

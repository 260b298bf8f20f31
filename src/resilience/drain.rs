use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ErrorKind};
use crate::resilience::connection::ConnectionHandle;
use crate::resilience::queue::{OperationQueue, PendingOperation};
use crate::resilience::retry_policy::RetryPolicy;
use crate::stats::StatsRecorder;

/// What one or more drain passes accomplished
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Completed successfully
    pub succeeded: usize,
    /// Completed with a permanent failure or an exhausted budget
    pub failed: usize,
    /// Parked for another attempt once their backoff elapses
    pub requeued: usize,
    /// The pass stopped early (retryable failure, lost session or cancellation)
    pub interrupted: bool,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.interrupted = other.interrupted;
    }

    /// Operations that reached a final outcome
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Executes queued operations against the current session.
///
/// Each operation gets one attempt per pass. A retryable failure parks it for
/// its backoff (it rejoins at the tail) and ends the pass; the untouched rest
/// of the batch goes back to the head in its original order.
#[derive(Debug, Clone)]
pub struct Drainer {
    connection: Arc<ConnectionHandle>,
    queue: Arc<OperationQueue>,
    policy: RetryPolicy,
    batch_size: usize,
    stats: Arc<StatsRecorder>,
}

impl Drainer {
    pub fn new(
        connection: Arc<ConnectionHandle>,
        queue: Arc<OperationQueue>,
        policy: RetryPolicy,
        batch_size: usize,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            connection,
            queue,
            policy,
            batch_size: batch_size.max(1),
            stats,
        }
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Keep running passes until nothing is ready or a pass is interrupted.
    /// Parked operations that are not yet due stay parked.
    pub async fn drain(&self, cancel: &CancellationToken) -> DrainReport {
        let mut total = DrainReport::default();

        loop {
            if self.queue.is_empty() {
                break;
            }
            let pass = self.drain_once(cancel).await;
            total.absorb(pass);
            if pass.interrupted || (pass.settled() == 0 && pass.requeued == 0) {
                break;
            }
        }

        if total.settled() > 0 || total.requeued > 0 {
            debug!(
                succeeded = total.succeeded,
                failed = total.failed,
                requeued = total.requeued,
                remaining = self.queue.len(),
                "Drained operation queue"
            );
        }
        total
    }

    /// Take one batch and attempt each operation once, in order
    pub async fn drain_once(&self, cancel: &CancellationToken) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.connection.is_healthy() || cancel.is_cancelled() {
            report.interrupted = true;
            return report;
        }

        let mut batch = self.queue.dequeue_batch(self.batch_size).into_iter();

        while let Some(mut op) = batch.next() {
            if cancel.is_cancelled() || !self.connection.is_healthy() {
                self.put_back(op, batch);
                report.interrupted = true;
                return report;
            }

            let attempt = op.record_attempt();
            let err = match self.connection.execute(op.operation()).await {
                Ok(response) => {
                    op.complete(Ok(response));
                    self.queue.settle(1);
                    self.stats.record_success();
                    report.succeeded += 1;
                    continue;
                }
                Err(err) => err,
            };

            let kind = err.kind();
            if kind == ErrorKind::Permanent {
                warn!(id = %op.id(), path = op.path(), error = %err, "Queued operation failed permanently");
                op.complete(Err(ClientError::Operation(err)));
                self.queue.settle(1);
                self.stats.record_failure();
                report.failed += 1;
                continue;
            }

            let decision = self.policy.decide(attempt, kind);
            if !decision.should_retry {
                error!(id = %op.id(), path = op.path(), attempts = attempt, error = %err, "Queued operation exhausted its retries");
                op.complete(Err(ClientError::ResourceExhausted {
                    attempts: attempt,
                    last_error: err,
                }));
                self.queue.settle(1);
                self.stats.record_failure();
                report.failed += 1;
                continue;
            }

            let delay = decision.delay.max(err.retry_after().unwrap_or_default());
            debug!(
                id = %op.id(),
                path = op.path(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Re-queueing operation behind newer work"
            );
            self.stats.record_retry();
            report.requeued += 1;
            if let Err(op) = self.queue.requeue(op, Instant::now() + delay) {
                op.complete(Err(ClientError::QueueFull {
                    capacity: self.queue.capacity(),
                }));
                self.stats.record_failure();
            }

            if kind == ErrorKind::Transient {
                self.connection.mark_degraded(&err.to_string());
            }

            // Stop hammering the store; the rest keeps its place at the head
            let rest: Vec<PendingOperation> = batch.collect();
            self.restore(rest);
            report.interrupted = true;
            return report;
        }

        report
    }

    fn put_back(&self, op: PendingOperation, rest: impl Iterator<Item = PendingOperation>) {
        let ops: Vec<PendingOperation> = std::iter::once(op).chain(rest).collect();
        self.restore(ops);
    }

    fn restore(&self, ops: Vec<PendingOperation>) {
        if ops.is_empty() {
            return;
        }
        for op in self.queue.restore_front(ops) {
            op.complete(Err(ClientError::QueueFull {
                capacity: self.queue.capacity(),
            }));
            self.stats.record_failure();
        }
    }
}

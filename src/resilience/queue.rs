use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{ClientError, QueueFullError, Result};
use crate::storage::{Operation, OperationKind, Response};

/// Callback invoked once with the final outcome of a queued operation
pub type CompletionCallback = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

enum CompletionSink {
    Channel(oneshot::Sender<Result<Response>>),
    Callback(CompletionCallback),
}

/// Future resolving to the outcome of an operation submitted asynchronously
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<Response>>,
}

impl Future for Completion {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ClientError::Internal(
                    "operation dropped before completing".to_string(),
                ))
            })
        })
    }
}

/// An operation waiting in (or taken from) the [`OperationQueue`]
pub struct PendingOperation {
    id: Uuid,
    operation: Operation,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
    not_before: Option<Instant>,
    sink: Option<CompletionSink>,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("kind", &self.operation.kind())
            .field("path", &self.operation.path())
            .field("enqueued_at", &self.enqueued_at)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl PendingOperation {
    fn with_sink(operation: Operation, sink: Option<CompletionSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            enqueued_at: Utc::now(),
            attempts: 0,
            not_before: None,
            sink,
        }
    }

    /// Pending operation paired with the future that observes it
    pub fn new(operation: Operation) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let pending = Self::with_sink(operation, Some(CompletionSink::Channel(tx)));
        (pending, Completion { rx })
    }

    pub fn with_callback<F>(operation: Operation, callback: F) -> Self
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        Self::with_sink(operation, Some(CompletionSink::Callback(Box::new(callback))))
    }

    /// Nobody is interested in the outcome
    pub fn detached(operation: Operation) -> Self {
        Self::with_sink(operation, None)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn path(&self) -> &str {
        self.operation.path()
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Earliest time the next attempt may start
    pub fn not_before(&self) -> Option<Instant> {
        self.not_before
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Deliver the final outcome
    pub fn complete(mut self, result: Result<Response>) {
        match self.sink.take() {
            // receiver gone means the caller stopped caring
            Some(CompletionSink::Channel(tx)) => {
                let _ = tx.send(result);
            }
            Some(CompletionSink::Callback(callback)) => callback(result),
            None => {}
        }
    }

    /// Drop the completion without signalling; the caller was told synchronously
    fn disarm(&mut self) {
        self.sink = None;
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let lost = Err(ClientError::Internal(format!(
                "operation {} dropped without completing",
                self.id
            )));
            match sink {
                CompletionSink::Channel(tx) => {
                    let _ = tx.send(lost);
                }
                CompletionSink::Callback(callback) => callback(lost),
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    buffer: VecDeque<PendingOperation>,
    // waiting out their backoff; they join the tail once due
    parked: Vec<PendingOperation>,
    // taken by dequeue_batch and not yet settled; they keep their slot
    in_flight: usize,
}

impl QueueInner {
    fn occupied(&self) -> usize {
        self.buffer.len() + self.parked.len() + self.in_flight
    }

    /// Move parked operations whose backoff has elapsed to the tail, earliest first
    fn promote_due(&mut self, now: Instant) {
        if self.parked.is_empty() {
            return;
        }
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|op| op.not_before.map_or(true, |at| at <= now));
        self.parked = waiting;
        due.sort_by_key(|op| op.not_before);
        self.buffer.extend(due);
    }
}

/// Bounded FIFO of pending operations.
///
/// `enqueue` never blocks: a full queue rejects immediately. Operations handed
/// out by [`dequeue_batch`](Self::dequeue_batch) keep their capacity slot until
/// they are [`settle`](Self::settle)d, [`requeue`](Self::requeue)d or
/// [`restore_front`](Self::restore_front)ed, so putting one back never overflows.
///
/// Re-queue policy: a retried operation is parked until its backoff elapses and
/// then joins the tail, behind everything enqueued in the meantime. One failing
/// operation cannot hold up the rest.
#[derive(Debug)]
pub struct OperationQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl OperationQueue {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                parked: Vec::new(),
                in_flight: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operations ready to run: the buffer plus parked ones that are now due.
    /// Counting does not move anything.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        let now = Instant::now();
        let due = inner
            .parked
            .iter()
            .filter(|op| op.not_before.map_or(true, |at| at <= now))
            .count();
        inner.buffer.len() + due
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations waiting out a retry backoff
    pub fn parked(&self) -> usize {
        self.lock().parked.len()
    }

    /// Operations taken by the drain loop and not yet settled
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Every slot in use: buffered, parked and in flight
    pub fn occupied(&self) -> usize {
        self.lock().occupied()
    }

    /// Nothing buffered, parked or in flight
    pub fn is_idle(&self) -> bool {
        self.lock().occupied() == 0
    }

    /// When the earliest parked operation becomes due
    pub fn next_due(&self) -> Option<Instant> {
        self.lock()
            .parked
            .iter()
            .map(|op| op.not_before.unwrap_or_else(Instant::now))
            .min()
    }

    pub fn enqueue(&self, mut op: PendingOperation) -> std::result::Result<(), QueueFullError> {
        let mut inner = self.lock();
        if inner.occupied() >= self.capacity {
            op.disarm();
            return Err(QueueFullError {
                capacity: self.capacity,
            });
        }
        // due retries keep their place ahead of the new arrival
        inner.promote_due(Instant::now());
        inner.buffer.push_back(op);
        Ok(())
    }

    /// Take up to `max_n` operations from the front, oldest first
    pub fn dequeue_batch(&self, max_n: usize) -> Vec<PendingOperation> {
        let mut inner = self.lock();
        inner.promote_due(Instant::now());
        let n = max_n.min(inner.buffer.len());
        let batch: Vec<PendingOperation> = inner.buffer.drain(..n).collect();
        inner.in_flight += batch.len();
        batch
    }

    /// Park a taken operation until `not_before`, after which it joins the tail.
    ///
    /// Gives the operation back when there is no room, which only happens if it
    /// did not come from `dequeue_batch`.
    pub fn requeue(
        &self,
        mut op: PendingOperation,
        not_before: Instant,
    ) -> std::result::Result<(), PendingOperation> {
        let mut inner = self.lock();
        if inner.in_flight > 0 {
            inner.in_flight -= 1;
        } else if inner.occupied() >= self.capacity {
            return Err(op);
        }
        op.not_before = Some(not_before);
        inner.parked.push(op);
        Ok(())
    }

    /// Return taken-but-unattempted operations to the head, keeping their order.
    ///
    /// Anything that does not fit is handed back.
    pub fn restore_front(&self, ops: Vec<PendingOperation>) -> Vec<PendingOperation> {
        let mut inner = self.lock();
        let reserved = inner.in_flight.min(ops.len());
        inner.in_flight -= reserved;

        let free = self.capacity.saturating_sub(inner.occupied());
        let mut ops = ops;
        let overflow = if ops.len() > free {
            ops.split_off(free)
        } else {
            Vec::new()
        };

        for op in ops.into_iter().rev() {
            inner.buffer.push_front(op);
        }
        overflow
    }

    /// Release the slots of `n` taken operations that reached a final outcome
    pub fn settle(&self, n: usize) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(n);
    }

    /// Empty the buffer and the parked set, oldest first. In-flight operations
    /// are untouched.
    pub fn drain_all(&self) -> Vec<PendingOperation> {
        let mut inner = self.lock();
        let mut parked = std::mem::take(&mut inner.parked);
        parked.sort_by_key(|op| op.not_before);
        let mut all: Vec<PendingOperation> = inner.buffer.drain(..).collect();
        all.extend(parked);
        all
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

// src/resilience/tests/mod.rs
//! Tests for the connection, retry, queue and monitor pieces

mod drain_tests;
mod health_monitor_tests;

// Common helpers for wiring resilience pieces together by hand
pub(crate) mod utils {
    use std::sync::Arc;

    use crate::resilience::{ConnectionHandle, Drainer, NoJitter, OperationQueue, RetryPolicy};
    use crate::stats::StatsRecorder;
    use crate::storage::{MemoryConnector, MemoryStore};
    use crate::test_utils::quick_retry;

    /// A handle over a fresh memory store with a one-retry connect budget
    pub fn memory_handle() -> (Arc<ConnectionHandle>, MemoryConnector) {
        let connector = MemoryConnector::new(MemoryStore::new());
        let handle = ConnectionHandle::new(
            Arc::new(connector.clone()),
            RetryPolicy::with_jitter(quick_retry(1), Arc::new(NoJitter)),
        );
        (Arc::new(handle), connector)
    }

    /// A drainer with a three-retry operation budget
    pub fn drainer_for(
        connection: &Arc<ConnectionHandle>,
        capacity: usize,
        batch_size: usize,
    ) -> (Drainer, Arc<OperationQueue>, Arc<StatsRecorder>) {
        let queue = Arc::new(OperationQueue::new(capacity));
        let stats = Arc::new(StatsRecorder::default());
        let drainer = Drainer::new(
            Arc::clone(connection),
            Arc::clone(&queue),
            RetryPolicy::with_jitter(quick_retry(3), Arc::new(NoJitter)),
            batch_size,
            Arc::clone(&stats),
        );
        (drainer, queue, stats)
    }
}

// src/stats.rs

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::resilience::ConnectionState;

/// Running counters shared by the synchronous path and the drain task
#[derive(Debug, Default)]
pub struct StatsRecorder {
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    rejected: AtomicU64,
}

impl StatsRecorder {
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission bounced off a full queue
    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub state: ConnectionState,
    pub queued: usize,
    /// waiting out a retry backoff
    pub parked: usize,
    pub in_flight: usize,
    pub queue_capacity: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub rejected: u64,
    pub sessions_opened: u64,
}

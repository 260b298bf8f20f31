// src/resilience/mod.rs
//! Resilience machinery behind the managed client.
//!
//! 1. **Retry policy** - Exponential backoff with a ceiling and injectable jitter
//! 2. **Connection handle** - One session, coalesced connects, state tracking
//! 3. **Operation queue** - Bounded FIFO buffering work during outages
//! 4. **Drain + health monitor** - Background reconnection and queue draining

mod connection;
mod drain;
mod health_monitor;
mod queue;
mod retry_policy;

#[cfg(test)]
mod tests;

// Re-export key components
pub use connection::{ConnectionHandle, ConnectionState};
pub use drain::{DrainReport, Drainer};
pub use health_monitor::{HealthCheckConfig, HealthMonitor};
pub use queue::{Completion, CompletionCallback, OperationQueue, PendingOperation};
pub use retry_policy::{JitterSource, NoJitter, RandomJitter, RetryDecision, RetryPolicy, SeededJitter};

pub use crate::config::RetryConfig;

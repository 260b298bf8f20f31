// library entry
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod stats;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export key components for convenience
pub use client::{ClientRegistry, ManagedClient};
pub use config::{ClientConfig, RetryConfig, ShutdownPolicy};
pub use error::{ClientError, ConnectError, ErrorKind, OpError, QueueFullError, Result};
pub use logging::{init as init_logging, LogFormat};
pub use resilience::{Completion, ConnectionState, RetryDecision, RetryPolicy};
pub use stats::ClientStats;
pub use storage::{Connector, Operation, RemoteStore, Response};

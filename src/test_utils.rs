// src/test_utils.rs

use std::sync::Arc;
use std::time::Duration;

use crate::client::ManagedClient;
use crate::config::{ClientConfig, RetryConfig, ShutdownPolicy};
use crate::resilience::{NoJitter, PendingOperation};
use crate::storage::{MemoryConnector, MemoryStore, Operation};

/// Retry budget with tiny delays and no jitter
pub fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(80),
        jitter_fraction: 0.0,
    }
}

/// Client config suited to paused-clock tests
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        retry: quick_retry(3),
        connect_retry: quick_retry(1),
        queue_capacity: 100,
        drain_batch_size: 10,
        health_check_interval: Duration::from_secs(1),
        probe_timeout: Duration::from_millis(100),
        operation_timeout: None,
        shutdown_policy: ShutdownPolicy::Drain,
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// A client over a fresh memory store, not yet started
pub fn memory_client(config: ClientConfig) -> (ManagedClient, MemoryConnector) {
    let connector = MemoryConnector::new(MemoryStore::new());
    let client = ManagedClient::builder(Arc::new(connector.clone()))
        .config(config)
        .jitter(Arc::new(NoJitter))
        .build()
        .expect("test config is valid");
    (client, connector)
}

/// A started client over a fresh memory store
pub async fn started_client(config: ClientConfig) -> (Arc<ManagedClient>, MemoryConnector) {
    let (client, connector) = memory_client(config);
    client.start().await;
    (Arc::new(client), connector)
}

/// Detached write to `path`
pub fn pending_write(path: &str) -> PendingOperation {
    PendingOperation::detached(Operation::write(path, path.as_bytes().to_vec()))
}

pub fn paths(ops: &[PendingOperation]) -> Vec<String> {
    ops.iter().map(|op| op.path().to_string()).collect()
}

// src/storage/memory.rs

// In-memory document store (for testing, demos and lightweight usage)
// Carries fault injection so outages can be simulated without a network.
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time;
use tracing::debug;

use crate::error::OpError;
use crate::storage::{Connector, RemoteStore, StoreResult};

#[derive(Debug)]
struct MemoryInner {
    data: RwLock<HashMap<String, Vec<u8>>>,
    // 0 means unbounded
    max_documents: usize,
    available: AtomicBool,
    scripted_failures: Mutex<VecDeque<OpError>>,
    journal: Mutex<Vec<String>>,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

/// In-memory document store backend
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, reachable store with no document limit
    pub fn new() -> Self {
        Self::with_max_documents(0)
    }

    /// Creates a store that rejects new documents beyond `max_documents`
    pub fn with_max_documents(max_documents: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(HashMap::new()),
                max_documents,
                available: AtomicBool::new(true),
                scripted_failures: Mutex::new(VecDeque::new()),
                journal: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Simulates the store going away (or coming back). While unavailable
    /// every call and every connect fails with a transient error.
    pub fn set_available(&self, available: bool) {
        let previous = self.inner.available.swap(available, Ordering::SeqCst);
        if previous != available {
            debug!(available, "Memory store availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Makes the next data call fail with `err`. Failures queue up in order.
    pub fn fail_next(&self, err: OpError) {
        self.inner
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Successful data calls in the order they were applied, as `kind:path`
    pub fn journal(&self) -> Vec<String> {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of data calls that reached the store, failed or not
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Number of sessions that were closed
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gate every data call goes through before touching the map
    fn admit(&self) -> StoreResult<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_available() {
            return Err(OpError::transient("memory store unreachable"));
        }

        let scripted = self
            .inner
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&self, kind: &str, path: &str) {
        self.inner
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}:{}", kind, path));
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.admit()?;
        let doc = self
            .inner
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        self.record("read", path);
        Ok(doc)
    }

    async fn set(&self, path: &str, payload: &[u8]) -> StoreResult<()> {
        self.admit()?;
        {
            let mut data = self.inner.data.write().unwrap_or_else(PoisonError::into_inner);

            // Apply max documents limit
            if self.inner.max_documents > 0
                && data.len() >= self.inner.max_documents
                && !data.contains_key(path)
            {
                return Err(OpError::permanent("Maximum document limit exceeded"));
            }

            data.insert(path.to_string(), payload.to_vec());
        }
        self.record("write", path);
        Ok(())
    }

    async fn update(&self, path: &str, payload: &[u8]) -> StoreResult<()> {
        self.admit()?;
        {
            let mut data = self.inner.data.write().unwrap_or_else(PoisonError::into_inner);
            match data.get_mut(path) {
                Some(doc) => *doc = payload.to_vec(),
                None => return Err(OpError::not_found(path)),
            }
        }
        self.record("update", path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        self.admit()?;
        let existed = self
            .inner
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some();
        self.record("delete", path);
        Ok(existed)
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(OpError::transient("memory store unreachable"))
        }
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ConnectorInner {
    store: MemoryStore,
    connects: AtomicUsize,
    scripted_failures: Mutex<VecDeque<OpError>>,
    connect_delay: Mutex<Option<Duration>>,
}

/// Hands out sessions on a shared [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<ConnectorInner>,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                store,
                connects: AtomicUsize::new(0),
                scripted_failures: Mutex::new(VecDeque::new()),
                connect_delay: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Number of connect attempts made so far
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Makes the next connect attempt fail with `err`
    pub fn fail_next_connect(&self, err: OpError) {
        self.inner
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Simulated handshake latency
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self
            .inner
            .connect_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn RemoteStore>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .inner
            .connect_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }

        let scripted = self
            .inner
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        if !self.inner.store.is_available() {
            return Err(OpError::transient("connection refused by memory store"));
        }

        Ok(Arc::new(self.inner.store.clone()))
    }
}

// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::{MemoryConnector, MemoryStore};
pub use redis::{RedisConnector, RedisStore};

use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::OpError;

/// Result of a single call against the remote store
pub type StoreResult<T> = std::result::Result<T, OpError>;

/// One live session against the remote document store.
///
/// Implementations classify every failure into an [`OpError`] so the client
/// can decide whether to retry. Payloads are opaque bytes.
#[async_trait]
pub trait RemoteStore: Send + Sync + Debug {
    // Fetches a document, `None` if it does not exist
    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    // Creates or replaces a document
    async fn set(&self, path: &str, payload: &[u8]) -> StoreResult<()>;

    // Replaces an existing document, Permanent error if it is missing
    async fn update(&self, path: &str, payload: &[u8]) -> StoreResult<()>;

    // Deletes a document, returns whether it existed
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    // Cheap liveness probe
    async fn ping(&self) -> StoreResult<()>;

    // Releases the session; called once when the handle drops it
    async fn close(&self) {}
}

/// Opens sessions against the remote store
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self) -> StoreResult<Arc<dyn RemoteStore>>;
}

/// Discriminant of an [`Operation`], used for logging and stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A single document operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { path: String },
    Write { path: String, payload: Vec<u8> },
    Update { path: String, payload: Vec<u8> },
    Delete { path: String },
}

impl Operation {
    pub fn read(path: impl Into<String>) -> Self {
        Operation::Read { path: path.into() }
    }

    pub fn write(path: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Operation::Write {
            path: path.into(),
            payload: payload.into(),
        }
    }

    pub fn update(path: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Operation::Update {
            path: path.into(),
            payload: payload.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Operation::Delete { path: path.into() }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Read { .. } => OperationKind::Read,
            Operation::Write { .. } => OperationKind::Write,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Operation::Read { path }
            | Operation::Write { path, .. }
            | Operation::Update { path, .. }
            | Operation::Delete { path } => path,
        }
    }

    /// Runs this operation against a session
    pub async fn apply(&self, store: &dyn RemoteStore) -> StoreResult<Response> {
        match self {
            Operation::Read { path } => store.get(path).await.map(Response::Document),
            Operation::Write { path, payload } => store.set(path, payload).await.map(|_| Response::Written),
            Operation::Update { path, payload } => {
                store.update(path, payload).await.map(|_| Response::Updated)
            }
            Operation::Delete { path } => store.delete(path).await.map(Response::Deleted),
        }
    }
}

/// Successful outcome of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Document(Option<Vec<u8>>),
    Written,
    Updated,
    Deleted(bool),
}

impl Response {
    /// Document body for reads, `None` for everything else
    pub fn into_document(self) -> Option<Vec<u8>> {
        match self {
            Response::Document(doc) => doc,
            _ => None,
        }
    }
}

// for error definitions
use std::time::Duration;
use thiserror::Error;

/// Retry classification of a failed store call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Expected to resolve on its own (network blip, timeout)
    Transient,
    /// Will not resolve on retry (invalid argument, not found, permission denied)
    Permanent,
    /// The store asked us to slow down
    RateLimited,
}

/// Errors returned by a single call against the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// Network or availability failure
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Failure that no amount of retrying will fix
    #[error("Permanent store error: {0}")]
    Permanent(String),

    /// Throttled by the store, optionally with a hint for when to come back
    #[error("Rate limited by store: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
}

impl OpError {
    pub fn transient(message: impl Into<String>) -> Self {
        OpError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        OpError::Permanent(message.into())
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        OpError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Permanent error for a document that does not exist
    pub fn not_found(path: &str) -> Self {
        OpError::Permanent(format!("Document not found: {}", path))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::Transient(_) => ErrorKind::Transient,
            OpError::Permanent(_) => ErrorKind::Permanent,
            OpError::RateLimited { .. } => ErrorKind::RateLimited,
        }
    }

    /// Server-provided backoff hint, only present on rate limiting
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OpError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised while establishing a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The store refused the session outright (bad credentials, bad address)
    #[error("Connection rejected: {0}")]
    Rejected(OpError),

    /// Connection retry budget used up
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: OpError },

    /// The handle was shut down while connecting
    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// Raised by the operation queue when it is at capacity
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation queue is full (capacity {capacity})")]
pub struct QueueFullError {
    pub capacity: usize,
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// Session could not be established
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// A permanent failure reported by the store
    #[error("Operation failed: {0}")]
    Operation(OpError),

    /// Backpressure: the queue cannot take more work
    #[error("Operation queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Retry budget exceeded for a queued operation
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    ResourceExhausted { attempts: u32, last_error: OpError },

    /// Synchronous call could not be served; never enqueued
    #[error("Store unavailable after {attempts} attempt(s)")]
    Unavailable {
        attempts: u32,
        last_error: Option<OpError>,
    },

    /// Cancelled or timed out between attempts
    #[error("Operation cancelled")]
    Cancelled,

    /// The client was shut down before the operation could run
    #[error("Client is shut down")]
    Shutdown,

    /// Data serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<QueueFullError> for ClientError {
    fn from(err: QueueFullError) -> Self {
        ClientError::QueueFull {
            capacity: err.capacity,
        }
    }
}

// Classify redis failures for the retry policy
impl From<redis::RedisError> for OpError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            return OpError::Transient(err.to_string());
        }

        match err.kind() {
            redis::ErrorKind::BusyLoadingError | redis::ErrorKind::TryAgain => {
                OpError::RateLimited {
                    message: err.to_string(),
                    retry_after: None,
                }
            }
            redis::ErrorKind::ClusterDown | redis::ErrorKind::MasterDown => {
                OpError::Transient(err.to_string())
            }
            _ => {
                // auth, type and response errors will fail the same way again
                OpError::Permanent(err.to_string())
            }
        }
    }
}

// implement conversions from serde_json::Error to ClientError
impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, ClientError>;

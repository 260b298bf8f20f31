// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use std::sync::Arc;

use crate::config::RedisStoreConfig;
use crate::error::OpError;
use crate::storage::{Connector, RemoteStore, StoreResult};

/// Document store session backed by Redis.
///
/// Every document is one Redis string under `<key_prefix>:<path>`.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

// ConnectionManager has no useful Debug output
impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    fn key(&self, path: &str) -> String {
        format!("{}:{}", self.key_prefix, path)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let doc: Option<Vec<u8>> = conn.get(self.key(path)).await?;
        Ok(doc)
    }

    async fn set(&self, path: &str, payload: &[u8]) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(self.key(path), payload).await?;
        Ok(())
    }

    async fn update(&self, path: &str, payload: &[u8]) -> StoreResult<()> {
        let mut conn = self.connection.clone();

        // XX only writes when the key already exists and replies nil otherwise
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(path))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => Ok(()),
            None => Err(OpError::not_found(path)),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(self.key(path)).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(OpError::transient(format!(
                "Unexpected response from Redis PING: {}",
                reply
            )))
        }
    }
}

/// Opens [`RedisStore`] sessions
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: RedisStoreConfig,
}

impl RedisConnector {
    pub fn new(config: RedisStoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn RemoteStore>> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(self.config.url.as_str())
            .map_err(|e| OpError::permanent(format!("invalid Redis URL: {}", e)))?;

        let connection_future = ConnectionManager::new(client);
        let connection =
            match tokio::time::timeout(self.config.connection_timeout, connection_future).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(OpError::transient(format!(
                        "Connection to Redis at {} timed out after {:?}",
                        self.config.url, self.config.connection_timeout
                    )));
                }
            };

        Ok(Arc::new(RedisStore {
            connection,
            key_prefix: self.config.key_prefix.clone(),
        }))
    }
}

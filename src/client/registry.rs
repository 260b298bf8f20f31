use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::ManagedClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::resilience::JitterSource;
use crate::storage::Connector;

/// Produces the connector for a fresh client
pub type ConnectorFactory = Box<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;

/// Owner of the one shared [`ManagedClient`].
///
/// The client is built lazily by the first [`get_instance`](Self::get_instance)
/// call; concurrent first callers wait on the init lock and all receive the
/// same instance. [`shutdown`](Self::shutdown) tears it down and empties the
/// slot so the next `get_instance` starts from scratch.
///
/// The init lock only guards construction. Operations on the client never
/// touch it.
pub struct ClientRegistry {
    config: ClientConfig,
    factory: ConnectorFactory,
    jitter: Option<Arc<dyn JitterSource>>,
    instance: Mutex<Option<Arc<ManagedClient>>>,
    constructions: AtomicUsize,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.config)
            .field("constructions", &self.constructions())
            .finish()
    }
}

impl ClientRegistry {
    pub fn new<F>(config: ClientConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            factory: Box::new(factory),
            jitter: None,
            instance: Mutex::new(None),
            constructions: AtomicUsize::new(0),
        })
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// The shared client, built and started on first use
    pub async fn get_instance(&self) -> Result<Arc<ManagedClient>> {
        let mut slot = self.instance.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }

        let mut builder = ManagedClient::builder((self.factory)()).config(self.config.clone());
        if let Some(jitter) = &self.jitter {
            builder = builder.jitter(Arc::clone(jitter));
        }
        let client = Arc::new(builder.build()?);
        let n = self.constructions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(constructions = n, "Constructed managed client");

        client.start().await;
        *slot = Some(Arc::clone(&client));
        info!(state = %client.state(), "Managed client initialized");
        Ok(client)
    }

    /// The current client, if one has been built
    pub async fn current(&self) -> Option<Arc<ManagedClient>> {
        self.instance.lock().await.clone()
    }

    /// Shut the client down and reset the slot. No-op when nothing is running.
    ///
    /// The slot stays locked until the old client has fully shut down, so a
    /// concurrent [`get_instance`](Self::get_instance) waits and then builds
    /// the replacement.
    pub async fn shutdown(&self) {
        let mut slot = self.instance.lock().await;
        match slot.take() {
            Some(client) => client.shutdown().await,
            None => debug!("Registry shutdown with no active client"),
        }
    }

    /// How many clients (and so connection handles) this registry has built
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

static GLOBAL: OnceLock<ClientRegistry> = OnceLock::new();

/// Install the process-wide registry. Only the first call succeeds.
pub fn install_global(registry: ClientRegistry) -> Result<&'static ClientRegistry> {
    GLOBAL
        .set(registry)
        .map_err(|_| ClientError::Config("global client registry already installed".to_string()))?;
    GLOBAL
        .get()
        .ok_or_else(|| ClientError::Internal("global client registry missing after install".to_string()))
}

/// The process-wide registry, if one was installed
pub fn global() -> Option<&'static ClientRegistry> {
    GLOBAL.get()
}

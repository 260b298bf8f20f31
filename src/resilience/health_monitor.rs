use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resilience::connection::{ConnectionHandle, ConnectionState};
use crate::resilience::drain::Drainer;

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often to probe the session
    pub check_interval: Duration,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

/// Background loop keeping the session alive and the queue moving.
///
/// Every tick it probes a connected session (degrading it on failure) and
/// reconnects anything that is not connected. A successful reconnect drains
/// the queue right away. Between ticks it also drains whenever new work is
/// signalled through [`waker`](Self::waker) and, while the session is
/// healthy, whenever a parked retry becomes due.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    connection: Arc<ConnectionHandle>,
    drainer: Drainer,
    config: HealthCheckConfig,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        connection: Arc<ConnectionHandle>,
        drainer: Drainer,
        config: HealthCheckConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            drainer,
            config,
            wake: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Notify this to request a drain outside the tick schedule
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Start the monitor background task
    pub fn start(&self) -> task::JoinHandle<()> {
        let monitor = self.clone();
        task::spawn(async move { monitor.run().await })
    }

    /// Stop the monitor; the task exits at its next loop boundary
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self) {
        let mut ticker = time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // a due retry can only run on a healthy session; until then the
            // tick's reconnect is what moves it
            let next_due = if self.connection.is_healthy() {
                self.drainer.queue().next_due()
            } else {
                None
            };
            let retry_due = async move {
                match next_due {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.check_once().await,
                _ = self.wake.notified() => self.drain_if_connected().await,
                _ = retry_due => self.drain_if_connected().await,
            }
        }

        debug!("Health monitor task stopped");
    }

    /// One probe/reconnect/drain cycle
    pub async fn check_once(&self) {
        match self.connection.state() {
            ConnectionState::Connected => match self.connection.probe(self.config.probe_timeout).await {
                Ok(()) => self.drain_if_connected().await,
                Err(e) => {
                    warn!(error = %e, "Health probe failed");
                    self.connection.mark_degraded(&e.to_string());
                    self.reconnect().await;
                }
            },
            // a connect is already running elsewhere
            ConnectionState::Connecting => {}
            ConnectionState::Disconnected | ConnectionState::Degraded => self.reconnect().await,
        }
    }

    async fn reconnect(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        match self.connection.connect().await {
            Ok(()) => {
                info!(queued = self.drainer.queue().len(), "Connection restored");
                self.drain_if_connected().await;
            }
            Err(e) => {
                warn!(error = %e, "Reconnect attempt failed, will retry on next check");
            }
        }
    }

    async fn drain_if_connected(&self) {
        if self.connection.is_healthy() && !self.drainer.queue().is_empty() {
            self.drainer.drain(&self.cancel).await;
        }
    }
}

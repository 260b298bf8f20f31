use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ConnectError, ErrorKind, OpError};
use crate::resilience::retry_policy::RetryPolicy;
use crate::storage::{Connector, Operation, RemoteStore, Response};
use crate::{state_change, store_op};

/// Lifecycle of the client's single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session, nothing buffered yet
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Session is up and answering
    Connected,
    /// Session went bad after being up; work keeps buffering
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Owns the one live session against the remote store.
///
/// Concurrent [`connect`](Self::connect) calls coalesce: callers that arrive
/// while an attempt is in flight wait for it and share its outcome, so at most
/// one session handshake runs at a time.
pub struct ConnectionHandle {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    session: RwLock<Option<Arc<dyn RemoteStore>>>,
    state: watch::Sender<ConnectionState>,
    /// Held for the whole duration of a connect attempt
    connect_lock: AsyncMutex<()>,
    completed_attempts: AtomicU64,
    last_outcome: Mutex<Option<Result<(), ConnectError>>>,
    sessions_opened: AtomicU64,
    cancel: CancellationToken,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connector", &self.connector)
            .field("state", &self.state())
            .field("sessions_opened", &self.sessions_opened())
            .finish()
    }
}

impl ConnectionHandle {
    /// Creates a disconnected handle; `policy` is the connection retry budget
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self::with_cancel(connector, policy, CancellationToken::new())
    }

    /// Like [`new`](Self::new), aborting connect attempts once `cancel` fires
    pub fn with_cancel(
        connector: Arc<dyn Connector>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            session: RwLock::new(None),
            state,
            connect_lock: AsyncMutex::new(()),
            completed_attempts: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            sessions_opened: AtomicU64::new(0),
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Cheap check: connected with a session in hand
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected && self.current_session().is_some()
    }

    /// How many sessions were successfully established over the handle's life
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Establish a session, retrying per the connection budget.
    ///
    /// Returns immediately when already connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.is_healthy() {
            return Ok(());
        }

        let observed = self.completed_attempts.load(Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        // Someone else finished an attempt while we were waiting
        if self.completed_attempts.load(Ordering::SeqCst) != observed {
            let shared = self
                .last_outcome
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(outcome) = shared {
                debug!("Joined in-flight connect attempt");
                return outcome;
            }
        }

        if self.is_healthy() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        let prior = self.transition(ConnectionState::Connecting);
        let started = Instant::now();

        let outcome = match self.establish().await {
            Ok(session) => {
                let stale = self
                    .session
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(session);
                if let Some(stale) = stale {
                    stale.close().await;
                }
                self.sessions_opened.fetch_add(1, Ordering::SeqCst);
                self.transition(ConnectionState::Connected);
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Session established"
                );
                Ok(())
            }
            Err(e) => {
                // A degraded client keeps buffering, so fall back to where we came from
                let fallback = match prior {
                    ConnectionState::Degraded => ConnectionState::Degraded,
                    _ => ConnectionState::Disconnected,
                };
                self.transition(fallback);
                error!(error = %e, "Failed to establish session");
                Err(e)
            }
        };

        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
        self.completed_attempts.fetch_add(1, Ordering::SeqCst);

        outcome
    }

    async fn establish(&self) -> Result<Arc<dyn RemoteStore>, ConnectError> {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ConnectError::Cancelled);
            }
            attempt += 1;

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ConnectError::Cancelled),
                connected = self.connector.connect() => connected,
            };
            let err = match connected {
                Ok(session) => return Ok(session),
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Permanent {
                return Err(ConnectError::Rejected(err));
            }

            let decision = self.policy.decide(attempt, err.kind());
            if !decision.should_retry {
                return Err(ConnectError::Exhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = decision.delay.max(err.retry_after().unwrap_or_default());
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Connect attempt failed, backing off"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ConnectError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }

    /// Drop the session. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(session) = session {
            session.close().await;
            debug!("Session closed");
        }
        self.transition(ConnectionState::Disconnected);
    }

    /// Abort any connect attempt and disconnect for good
    pub async fn close(&self) {
        self.cancel.cancel();
        self.disconnect().await;
    }

    /// Flag a connected session as misbehaving. No-op in any other state.
    pub fn mark_degraded(&self, reason: &str) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Degraded;
                true
            } else {
                false
            }
        });
        if changed {
            warn!(reason, "Connection degraded");
        }
        changed
    }

    /// Ping the session, bounded by `timeout`
    pub async fn probe(&self, timeout: Duration) -> Result<(), OpError> {
        let session = self
            .current_session()
            .ok_or_else(|| OpError::transient("no active session"))?;

        match time::timeout(timeout, session.ping()).await {
            Ok(result) => result,
            Err(_) => Err(OpError::transient(format!(
                "health probe timed out after {:?}",
                timeout
            ))),
        }
    }

    /// Run one operation against the current session, without retrying
    pub async fn execute(&self, op: &Operation) -> Result<Response, OpError> {
        let session = self
            .current_session()
            .ok_or_else(|| OpError::transient("not connected"))?;

        let started = Instant::now();
        let result = op.apply(session.as_ref()).await;
        store_op!(
            op.kind(),
            op.path(),
            result,
            started.elapsed().as_millis() as u64
        );
        result
    }

    fn current_session(&self) -> Option<Arc<dyn RemoteStore>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the state, logging real changes; returns the previous state
    fn transition(&self, to: ConnectionState) -> ConnectionState {
        let from = self.state.send_replace(to);
        if from != to {
            state_change!(from, to);
        }
        from
    }
}

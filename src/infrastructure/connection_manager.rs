//! Datastore Connection Manager
//!
//! Owns the datastore handle and drives it through an explicit
//! `Disconnected -> Connecting -> Connected` state machine. A supervisor task
//! runs the fixed-interval retry loop at startup and again whenever the
//! resource is reported lost, either by a failing handler query or by the
//! periodic probe.

use crate::domain::ports::{Connector, EntryStore, MetricsStore, StoreError};
use crate::domain::value_objects::{ConnectionState, RetryConfig};
use crate::error::AppError;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};

/// Fatal connection-layer errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// A bounded retry budget ran out.
    #[error("datastore unreachable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    /// Shutdown was signalled while a connect cycle was running.
    #[error("connect cycle cancelled by shutdown")]
    Cancelled,
}

/// Point-in-time view of the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Attempts made in the current (or last) connect cycle
    pub attempts: u32,
    /// Number of times a connected handle was lost
    pub reconnects: u64,
    /// Bumped every time a new resource is installed
    pub generation: u64,
}

/// The handle itself. Only the manager mutates it.
struct ConnectionHandle {
    state: ConnectionState,
    attempts: u32,
    reconnects: u64,
    generation: u64,
    store: Option<Arc<dyn EntryStore>>,
}

/// Connection manager for the datastore.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    retry: RetryConfig,
    handle: RwLock<ConnectionHandle>,
    /// Woken when a connected handle is reported lost
    lost: Notify,
    state_tx: watch::Sender<ConnectionState>,
    metrics: Option<Arc<dyn MetricsStore>>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state. Nothing is attempted
    /// until [`connect`](Self::connect) or [`run`](Self::run) is called.
    pub fn new(connector: Arc<dyn Connector>, retry: RetryConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            retry,
            handle: RwLock::new(ConnectionHandle {
                state: ConnectionState::Disconnected,
                attempts: 0,
                reconnects: 0,
                generation: 0,
                store: None,
            }),
            lost: Notify::new(),
            state_tx,
            metrics: None,
        }
    }

    /// Report state transitions and attempts to a metrics store.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsStore>) -> Self {
        metrics.record_connection_state(ConnectionState::Disconnected);
        self.metrics = Some(metrics);
        self
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.handle.read().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let handle = self.handle.read();
        ConnectionSnapshot {
            state: handle.state,
            attempts: handle.attempts,
            reconnects: handle.reconnects,
            generation: handle.generation,
        }
    }

    /// Watch state transitions. Every attempt publishes `Connecting` again,
    /// so a receiver sees one change per attempt.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Borrow the live resource, failing fast when there is none.
    pub fn store(&self) -> Result<Arc<dyn EntryStore>, AppError> {
        self.checkout().map(|(store, _)| store)
    }

    fn checkout(&self) -> Result<(Arc<dyn EntryStore>, u64), AppError> {
        let handle = self.handle.read();
        match (&handle.state, &handle.store) {
            (ConnectionState::Connected, Some(store)) => Ok((store.clone(), handle.generation)),
            _ => Err(AppError::ConnectionUnavailable),
        }
    }

    /// Run a query against the live resource.
    ///
    /// Fails immediately with `ConnectionUnavailable` when not connected.
    /// A connectivity failure moves the handle back to `Connecting` before
    /// the error is returned, and wakes the supervisor.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(Arc<dyn EntryStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let (store, generation) = self.checkout()?;

        match op(store).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.classify_failure(e, generation)),
        }
    }

    fn classify_failure(&self, err: StoreError, generation: u64) -> AppError {
        match err {
            StoreError::Connection(msg) => {
                tracing::error!("datastore query failed, connection lost: {}", msg);
                self.mark_lost(generation);
                AppError::ConnectionUnavailable
            }
            StoreError::Timeout => {
                tracing::warn!("timed out acquiring a datastore connection");
                AppError::ConnectionUnavailable
            }
            StoreError::Query(msg) => AppError::Internal(msg),
        }
    }

    /// Readiness check: run the trivial query through the managed handle.
    pub async fn ping(&self) -> Result<String, AppError> {
        self.execute(|store| async move { store.ping().await }).await
    }

    fn is_current(&self, generation: u64) -> bool {
        let handle = self.handle.read();
        handle.state == ConnectionState::Connected && handle.generation == generation
    }

    /// Transition a connected handle of `generation` to `Connecting`.
    ///
    /// Reports for a resource that was already replaced are ignored.
    fn mark_lost(&self, generation: u64) -> bool {
        {
            let mut handle = self.handle.write();
            if handle.state != ConnectionState::Connected || handle.generation != generation {
                return false;
            }
            handle.state = ConnectionState::Connecting;
            handle.attempts = 0;
            handle.reconnects += 1;
        }
        self.publish(ConnectionState::Connecting);
        if let Some(m) = &self.metrics {
            m.record_reconnect();
        }
        self.lost.notify_one();
        true
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        if let Some(m) = &self.metrics {
            m.record_connection_state(state);
        }
    }

    fn begin_attempt(&self, attempt: u32) {
        {
            let mut handle = self.handle.write();
            handle.state = ConnectionState::Connecting;
            handle.attempts = attempt;
        }
        self.publish(ConnectionState::Connecting);
    }

    fn install(&self, store: Arc<dyn EntryStore>) -> Arc<dyn EntryStore> {
        {
            let mut handle = self.handle.write();
            handle.state = ConnectionState::Connected;
            handle.generation += 1;
            handle.store = Some(store.clone());
        }
        self.publish(ConnectionState::Connected);
        store
    }

    /// Drop the current resource and return it so it can be closed.
    fn take_store(&self, state: ConnectionState) -> Option<Arc<dyn EntryStore>> {
        let store = {
            let mut handle = self.handle.write();
            handle.state = state;
            handle.store.take()
        };
        self.publish(state);
        store
    }

    /// Connect, retrying at the configured interval.
    ///
    /// Returns the installed resource, or `RetriesExhausted` when a bounded
    /// policy runs out.
    pub async fn connect(&self) -> Result<Arc<dyn EntryStore>, ConnectionError> {
        self.establish(&mut None).await
    }

    async fn establish(
        &self,
        shutdown: &mut Option<broadcast::Receiver<()>>,
    ) -> Result<Arc<dyn EntryStore>, ConnectionError> {
        let target = self.connector.target();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.begin_attempt(attempt);
            tracing::info!("connecting to datastore {} (attempt {})", target, attempt);

            let result = tokio::select! {
                result = self.connector.connect() => result,
                _ = cancelled(shutdown) => {
                    self.take_store(ConnectionState::Disconnected);
                    return Err(ConnectionError::Cancelled);
                }
            };

            match result {
                Ok(store) => {
                    if let Some(m) = &self.metrics {
                        m.record_connect_attempt(true);
                    }
                    tracing::info!("connected to datastore {}", target);
                    return Ok(self.install(store));
                }
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.record_connect_attempt(false);
                    }

                    if !self.retry.policy.allows_retry(attempt) {
                        self.take_store(ConnectionState::Disconnected);
                        tracing::error!(
                            "datastore {} unreachable after {} attempts: {}",
                            target,
                            attempt,
                            e
                        );
                        return Err(ConnectionError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    tracing::warn!(
                        "datastore not ready, retrying in {:?}: {}",
                        self.retry.interval,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.interval) => {}
                        _ = cancelled(shutdown) => {
                            self.take_store(ConnectionState::Disconnected);
                            return Err(ConnectionError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Supervisor loop.
    ///
    /// Connects, then waits for the handle to be lost (reported by a query
    /// or detected by the probe) and reconnects. Returns `Ok(())` on
    /// shutdown and `Err` only when a bounded policy is exhausted.
    pub async fn run(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ConnectionError> {
        let mut shutdown = Some(shutdown);

        loop {
            let store = match self.establish(&mut shutdown).await {
                Ok(store) => store,
                Err(ConnectionError::Cancelled) => break,
                Err(e) => return Err(e),
            };
            let generation = self.snapshot().generation;

            let stop = loop {
                tokio::select! {
                    _ = self.lost.notified() => {}
                    _ = self.probe(generation) => {}
                    _ = cancelled(&mut shutdown) => break true,
                }
                // A wakeup left over from an earlier cycle is not a loss.
                if !self.is_current(generation) {
                    break false;
                }
            };

            if stop {
                break;
            }

            tracing::warn!("datastore connection lost, reconnecting");
            drop(store);
            if let Some(old) = self.take_store(ConnectionState::Connecting) {
                old.close().await;
            }
        }

        if let Some(store) = self.take_store(ConnectionState::Disconnected) {
            store.close().await;
        }
        tracing::info!("datastore supervisor stopped");
        Ok(())
    }

    /// Probe the resource until it stops answering.
    ///
    /// Unlike handler queries, a pool timeout here marks the handle lost.
    async fn probe(&self, generation: u64) {
        let mut ticker = tokio::time::interval(self.retry.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let store = match self.checkout() {
                Ok((store, current)) if current == generation => store,
                _ => return,
            };
            match store.ping().await {
                Ok(_) => tracing::debug!("datastore probe ok"),
                Err(e) if e.is_unreachable() => {
                    tracing::error!("datastore probe failed: {}", e);
                    if self.mark_lost(generation) {
                        return;
                    }
                }
                Err(e) => tracing::warn!("datastore probe error: {}", e),
            }
        }
    }
}

/// Resolves when a shutdown is signalled; never resolves without a receiver.
async fn cancelled(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

//! Graceful Shutdown
//!
//! One controller is shared by the HTTP listener, the request middleware and
//! the datastore supervisor. Requests hold a [`RequestGuard`] while they are
//! served so the listener can wait for them before the process exits.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

struct Inner {
    stopping: watch::Sender<bool>,
    /// Fan-out for tasks that select on a receiver
    signal: broadcast::Sender<()>,
    requests: watch::Sender<usize>,
}

/// Shutdown flag plus the count of requests still being served.
#[derive(Clone)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (signal, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                stopping: watch::Sender::new(false),
                signal,
                requests: watch::Sender::new(0),
            }),
        }
    }

    /// Receiver that gets one message when shutdown starts.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.signal.subscribe()
    }

    /// Start shutting down. Later calls do nothing.
    pub fn shutdown(&self) {
        if !self.inner.stopping.send_replace(true) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.inner.signal.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.stopping.borrow()
    }

    /// Resolves once shutdown has started, including when it already has.
    pub async fn wait(&self) {
        let mut stopping = self.inner.stopping.subscribe();
        let _ = stopping.wait_for(|s| *s).await;
    }

    /// Requests currently holding a guard.
    pub fn in_flight(&self) -> usize {
        *self.inner.requests.borrow()
    }

    /// Count a request as in flight until the guard is dropped.
    pub fn request_guard(&self) -> RequestGuard {
        self.inner.requests.send_modify(|n| *n += 1);
        RequestGuard {
            controller: self.clone(),
        }
    }

    /// Wait until no request holds a guard.
    ///
    /// Returns `false` if requests are still in flight after `timeout`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut requests = self.inner.requests.subscribe();
        let drained = match tokio::time::timeout(timeout, requests.wait_for(|n| *n == 0)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "drain timeout: {} requests still in flight",
                    self.in_flight()
                );
                false
            }
        };
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the request middleware for the lifetime of one request.
pub struct RequestGuard {
    controller: ShutdownController,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.controller
            .inner
            .requests
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Shut the controller down on SIGINT or SIGTERM.
///
/// Also returns when something else already started the shutdown.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
        _ = controller.wait() => {}
    }

    controller.shutdown();
}

//! journal-api - Journal entries service with a resilient datastore layer
//!
//! This is the composition root that wires together all the components.

use journal_api::adapters::inbound::{ApiServer, AppState, BuildInfo};
use journal_api::adapters::outbound::{PostgresConnector, PrometheusMetricsStore, SqliteConnector};
use journal_api::config::{load_config, DbDriver};
use journal_api::domain::ports::{Connector, MetricsStore};
use journal_api::domain::services::{AuthService, TokenService};
use journal_api::infrastructure::{shutdown_signal, ConnectionManager, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting journal-api version={} commit={} listen={} driver={:?}",
        cfg.app_version,
        cfg.git_sha,
        cfg.listen_addr(),
        cfg.db_driver
    );

    // ===== COMPOSITION ROOT =====

    // 1. Metrics registry, shared by the connection manager and the API
    let metrics: Arc<dyn MetricsStore> =
        Arc::new(PrometheusMetricsStore::new(cfg.metrics_prefix.clone()));

    // 2. Datastore connector and connection manager
    let connector: Arc<dyn Connector> = match cfg.db_driver {
        DbDriver::Postgres => Arc::new(PostgresConnector::new(cfg.postgres_config())),
        DbDriver::Sqlite => Arc::new(SqliteConnector::new(cfg.sqlite_config())),
    };
    let db = Arc::new(
        ConnectionManager::new(connector, cfg.retry_config()).with_metrics(metrics.clone()),
    );

    // 3. Login account and token issuer
    let tokens = TokenService::new(
        &cfg.jwt_secret,
        Duration::from_secs(cfg.jwt_expires_in_secs),
    );
    let auth = match &cfg.auth_password_hash {
        Some(hash) => AuthService::with_hash(&cfg.auth_username, hash, cfg.auth_role, tokens)?,
        None => {
            if cfg.uses_default_password() {
                tracing::warn!(
                    "AUTH_PASSWORD not set, using the development default password for '{}'",
                    cfg.auth_username
                );
            }
            let username = cfg.auth_username.clone();
            let password = cfg.auth_password().to_string();
            let role = cfg.auth_role;
            tokio::task::spawn_blocking(move || {
                AuthService::with_password(&username, &password, role, tokens)
            })
            .await??
        }
    };

    // 4. Shutdown coordination and the connection supervisor
    let shutdown = ShutdownController::new();
    let mut supervisor = tokio::spawn(db.clone().run(shutdown.subscribe()));
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // 5. HTTP server
    let state = AppState::new(
        db,
        Arc::new(auth),
        metrics,
        shutdown.clone(),
        BuildInfo {
            version: cfg.app_version.clone(),
            commit: cfg.git_sha.clone(),
        },
    );
    let server = ApiServer::new(cfg.listen_addr(), state)
        .with_cors(cfg.cors_allowed_origins.clone())
        .with_drain_timeout(Duration::from_secs(cfg.shutdown_timeout_secs));
    let mut server = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server => {
            // The listener stopped: either shutdown or a bind/serve failure.
            shutdown.shutdown();
            if let Err(e) = supervisor.await? {
                tracing::error!("datastore supervisor failed: {}", e);
            }
            result??;
        }
        result = &mut supervisor => {
            if let Err(e) = result? {
                tracing::error!("{}, exiting", e);
                shutdown.shutdown();
                match server.await {
                    Ok(Ok(())) => {}
                    Ok(Err(serve_err)) => tracing::error!("http server failed: {}", serve_err),
                    Err(join_err) => tracing::error!("http server task failed: {}", join_err),
                }
                return Err(e.into());
            }
            server.await??;
        }
    }

    tracing::info!("journal-api stopped");
    Ok(())
}

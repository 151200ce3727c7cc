//! Journal API Server
//!
//! HTTP surface of the service: liveness and readiness probes, login,
//! entry CRUD and the metrics exposition endpoint.

use super::auth::{AdminUser, AuthUser};
use super::instrumentation::{track_requests, METRICS_PATH};
use crate::application::EntryService;
use crate::domain::entities::EntryInput;
use crate::domain::ports::MetricsStore;
use crate::domain::services::AuthService;
use crate::error::AppError;
use crate::infrastructure::{ConnectionManager, ShutdownController};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build metadata reported by the liveness probe.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: "unknown".to_string(),
        }
    }
}

/// Login request body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub commit: String,
    pub timestamp: String,
}

/// API Server state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<ConnectionManager>,
    pub entries: EntryService,
    pub auth: Arc<AuthService>,
    pub metrics: Arc<dyn MetricsStore>,
    pub shutdown: ShutdownController,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        db: Arc<ConnectionManager>,
        auth: Arc<AuthService>,
        metrics: Arc<dyn MetricsStore>,
        shutdown: ShutdownController,
        build: BuildInfo,
    ) -> Self {
        Self {
            entries: EntryService::new(db.clone()),
            db,
            auth,
            metrics,
            shutdown,
            build,
        }
    }
}

/// Build the application router.
///
/// Instrumentation is applied with `Router::layer`, so it wraps every
/// matched route as well as the fallback. Panics inside handlers are turned
/// into 500 responses before they reach it.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/db-health", get(db_health_handler))
        .route("/api/db-health", get(db_health_handler))
        .route("/auth/login", post(login_handler))
        .route("/login", post(login_handler))
        .route("/entries", get(list_entries_handler).post(create_entry_handler))
        .route(
            "/entries/:id",
            get(get_entry_handler)
                .put(update_entry_handler)
                .delete(delete_entry_handler),
        )
        .route(METRICS_PATH, get(metrics_handler))
        .fallback(fallback_handler)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http());

    let router = match cors_layer(cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(AnyOrigin)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    AppError::Internal("handler panicked".to_string()).into_response()
}

/// HTTP server with graceful shutdown.
pub struct ApiServer {
    listen_addr: String,
    state: AppState,
    cors_origins: Vec<String>,
    drain_timeout: Duration,
}

impl ApiServer {
    pub fn new(listen_addr: String, state: AppState) -> Self {
        Self {
            listen_addr,
            state,
            cors_origins: Vec::new(),
            drain_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_cors(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Get shared state for use by other components.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone(), &self.cors_origins)
    }

    /// Bind the configured address and serve until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// Once the shutdown controller fires, the listener stops accepting and
    /// in-flight requests get up to the drain timeout to finish.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let app = self.router();
        let shutdown = self.state.shutdown.clone();
        tracing::info!("journal API listening on {}", addr);

        let signal = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.wait().await })
                .await
        });

        tokio::select! {
            result = &mut server => return Ok(result??),
            _ = shutdown.wait() => {}
        }

        if !shutdown.wait_for_drain(self.drain_timeout).await {
            server.abort();
            return Ok(());
        }

        match tokio::time::timeout(self.drain_timeout, &mut server).await {
            Ok(result) => {
                result??;
                tracing::info!("journal API stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("listener did not close within {:?}", self.drain_timeout);
                server.abort();
                Ok(())
            }
        }
    }
}

// Handler functions

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK",
        version: state.build.version.clone(),
        commit: state.build.commit.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn db_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(now) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "OK",
                "db": "connected",
                "result": now
            })),
        ),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "ERROR",
                    "db": "disconnected",
                    "error": e.public_message()
                })),
            )
        }
    }
}

async fn login_handler(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(req) = payload?;
    let auth = state.auth.clone();
    let username = req.username.clone();

    let result = tokio::task::spawn_blocking(move || auth.login(&req.username, &req.password))
        .await
        .map_err(|e| AppError::Internal(format!("login task failed: {}", e)))?;

    match result {
        Ok(token) => Ok(Json(LoginResponse { token })),
        Err(e) => {
            tracing::warn!("failed login attempt for user '{}'", username);
            Err(e)
        }
    }
}

async fn list_entries_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.entries.list().await?))
}

async fn get_entry_handler(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id?;
    Ok(Json(state.entries.get(id).await?))
}

async fn create_entry_handler(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<EntryInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = payload?;
    let entry = state.entries.create(input).await?;
    tracing::info!("user {} created entry {}", claims.username, entry.id);
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn update_entry_handler(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<EntryInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    let entry = state.entries.update(id, input).await?;
    tracing::info!("user {} updated entry {}", claims.username, entry.id);
    Ok(Json(entry))
}

async fn delete_entry_handler(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(id) = id?;
    let entry = state.entries.delete(id).await?;
    tracing::info!("user {} deleted entry {}", claims.username, entry.id);
    Ok(Json(entry))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

async fn fallback_handler() -> AppError {
    AppError::not_found("route not found")
}

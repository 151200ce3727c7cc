//! End-to-end tests over a real TCP listener
//!
//! Starts the server with a SQLite datastore and its supervisor, talks to
//! it with reqwest, then shuts everything down.

use futures::future::join_all;
use journal_api::adapters::inbound::{ApiServer, AppState, BuildInfo};
use journal_api::adapters::outbound::{PrometheusMetricsStore, SqliteConfig, SqliteConnector};
use journal_api::domain::ports::MetricsStore;
use journal_api::domain::services::{AuthService, TokenService};
use journal_api::domain::value_objects::{ConnectionState, RetryConfig, Role};
use journal_api::infrastructure::{ConnectionManager, ShutdownController};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    db: Arc<ConnectionManager>,
    shutdown: ShutdownController,
    server: JoinHandle<anyhow::Result<()>>,
    supervisor: JoinHandle<Result<(), journal_api::infrastructure::ConnectionError>>,
    _dir: TempDir,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        self.supervisor.await.unwrap().unwrap();
        assert_eq!(self.db.state(), ConnectionState::Disconnected);
    }
}

async fn start() -> Running {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(SqliteConnector::new(SqliteConfig {
        path: dir.path().join("journal.db"),
        ..Default::default()
    }));
    let metrics: Arc<dyn MetricsStore> = Arc::new(PrometheusMetricsStore::new("journal"));
    let db = Arc::new(
        ConnectionManager::new(connector, RetryConfig::default()).with_metrics(metrics.clone()),
    );
    let auth = AuthService::with_password(
        "admin",
        "admin123",
        Role::Admin,
        TokenService::new("e2e-secret", Duration::from_secs(60)),
    )
    .unwrap();

    let shutdown = ShutdownController::new();
    let supervisor = tokio::spawn(db.clone().run(shutdown.subscribe()));
    db.subscribe()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    let state = AppState::new(
        db.clone(),
        Arc::new(auth),
        metrics,
        shutdown.clone(),
        BuildInfo {
            version: "e2e".to_string(),
            commit: "unknown".to_string(),
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServer::new(addr.to_string(), state)
        .with_drain_timeout(Duration::from_secs(2));
    let server = tokio::spawn(server.serve(listener));

    Running {
        addr,
        db,
        shutdown,
        server,
        supervisor,
        _dir: dir,
    }
}

/// Login, create a few entries concurrently, read them back and scrape metrics.
#[tokio::test]
async fn test_journal_over_http() {
    let running = start().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(running.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "OK");

    let ready = client.get(running.url("/db-health")).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::OK);

    let login: serde_json::Value = client
        .post(running.url("/auth/login"))
        .json(&serde_json::json!({ "username": "admin", "password": "admin123" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    let creates = (0..5).map(|i| {
        client
            .post(running.url("/entries"))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "title": format!("entry {}", i) }))
            .send()
    });
    for response in join_all(creates).await {
        assert_eq!(response.unwrap().status(), reqwest::StatusCode::CREATED);
    }

    let entries: Vec<serde_json::Value> = client
        .get(running.url("/entries"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entries.len(), 5);

    let metrics = client.get(running.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), reqwest::StatusCode::OK);
    assert!(metrics
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = metrics.text().await.unwrap();
    assert!(text.contains(
        "journal_http_requests_total{method=\"POST\",route=\"/entries\",status=\"201\"} 5"
    ));
    assert!(text.contains(
        "journal_http_requests_total{method=\"GET\",route=\"/entries\",status=\"200\"} 1"
    ));
    assert!(text.contains("journal_http_requests_in_flight 0"));

    running.stop().await;
}

/// After shutdown the listener no longer accepts connections.
#[tokio::test]
async fn test_shutdown_closes_listener() {
    let running = start().await;
    let addr = running.addr;

    let response = reqwest::get(running.url("/health")).await.unwrap();
    assert!(response.status().is_success());

    running.stop().await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    assert!(client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .is_err());
}

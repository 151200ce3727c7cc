//! PostgreSQL Entry Store
//!
//! Implements the entry store over a `sqlx` PostgreSQL pool.

use crate::domain::entities::{Entry, NewEntry};
use crate::domain::ports::{Connector, EntryStore, StoreError, ENTRIES_SCHEMA_POSTGRES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

const ENTRY_COLUMNS: &str = "id, title, description, created_at";

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the individual fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Maximum connections in the pool
    pub max_connections: u32,
    /// How long an unused connection is kept
    pub idle_timeout: Duration,
    /// Connection and acquire timeout
    pub connect_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "journal".to_string(),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PostgresConfig {
    /// Build connect options from the URL or the individual fields.
    pub fn connect_options(&self) -> Result<PgConnectOptions, StoreError> {
        if let Some(url) = &self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| StoreError::Connection(format!("invalid DATABASE_URL: {}", e)));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }

    /// Target for logs, without credentials.
    pub fn target(&self) -> String {
        match self.connect_options() {
            Ok(options) => format!(
                "postgres://{}:{}/{}",
                options.get_host(),
                options.get_port(),
                options.get_database().unwrap_or_default()
            ),
            Err(_) => "postgres://<invalid url>".to_string(),
        }
    }
}

/// Opens PostgreSQL entry stores.
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Arc<dyn EntryStore>, StoreError> {
        let options = self.config.connect_options()?;

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .idle_timeout(Some(self.config.idle_timeout))
            .acquire_timeout(self.config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if let Err(e) = sqlx::query(ENTRIES_SCHEMA_POSTGRES).execute(&pool).await {
            pool.close().await;
            return Err(StoreError::Connection(e.to_string()));
        }

        Ok(Arc::new(PgEntryStore::new(pool)))
    }

    fn target(&self) -> String {
        self.config.target()
    }
}

/// Entry store over a PostgreSQL pool.
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<Entry, sqlx::Error> {
    Ok(Entry {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Classify a driver error.
///
/// Socket, TLS and protocol failures, a closed pool, a crashed worker, and
/// SQLSTATE classes `08` (connection exception) and `57P0x` (operator
/// intervention, e.g. admin shutdown) mean the connection is gone.
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if is_connection_sqlstate(&code) => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        _ => StoreError::Query(err.to_string()),
    }
}

fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57P0")
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn ping(&self) -> Result<String, StoreError> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(now.to_rfc3339())
    }

    async fn list(&self) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entries ORDER BY created_at DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)
    }

    async fn get(&self, id: i64) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(entry_from_row).transpose().map_err(classify)
    }

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO entries (title, description) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry.title)
        .bind(entry.description)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        entry_from_row(&row).map_err(classify)
    }

    async fn update(&self, id: i64, entry: NewEntry) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE entries SET title = $1, description = $2 WHERE id = $3 RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry.title)
        .bind(entry.description)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(entry_from_row).transpose().map_err(classify)
    }

    async fn delete(&self, id: i64) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM entries WHERE id = $1 RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(entry_from_row).transpose().map_err(classify)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("closed postgres pool");
    }
}

//! SQLite Entry Store
//!
//! File-backed entry store for local runs and tests, over a `sqlx` SQLite
//! pool.

use crate::domain::entities::{Entry, NewEntry};
use crate::domain::ports::{Connector, EntryStore, StoreError, ENTRIES_SCHEMA_SQLITE};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const ENTRY_COLUMNS: &str = "id, title, description, created_at";

/// SQLite connection configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, created if missing
    pub path: PathBuf,
    pub max_connections: u32,
    pub idle_timeout: Duration,
    /// Connections older than this are replaced
    pub max_lifetime: Duration,
    /// Acquire timeout
    pub connect_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("journal.db"),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens SQLite entry stores.
pub struct SqliteConnector {
    config: SqliteConfig,
}

impl SqliteConnector {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<Arc<dyn EntryStore>, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .idle_timeout(Some(self.config.idle_timeout))
            .max_lifetime(Some(self.config.max_lifetime))
            .acquire_timeout(self.config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if let Err(e) = sqlx::query(ENTRIES_SCHEMA_SQLITE).execute(&pool).await {
            pool.close().await;
            return Err(StoreError::Connection(e.to_string()));
        }

        Ok(Arc::new(SqliteEntryStore {
            pool,
            path: self.config.path.clone(),
        }))
    }

    fn target(&self) -> String {
        format!("sqlite://{}", self.config.path.display())
    }
}

/// Entry store over a SQLite pool.
pub struct SqliteEntryStore {
    pool: SqlitePool,
    path: PathBuf,
}

fn entry_from_row(row: &SqliteRow) -> Result<Entry, sqlx::Error> {
    Ok(Entry {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Classify a driver error.
///
/// I/O failures, a closed pool, a crashed worker, and the result codes
/// `CANTOPEN`, `IOERR`, `CORRUPT` and `NOTADB` mean the file is unusable.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::Connection(err.to_string())
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if is_connection_code(&code) => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        },
        _ => StoreError::Query(err.to_string()),
    }
}

/// Extended result codes carry the primary code in the low byte.
fn is_connection_code(code: &str) -> bool {
    const IOERR: i32 = 10;
    const CORRUPT: i32 = 11;
    const CANTOPEN: i32 = 14;
    const NOTADB: i32 = 26;

    match code.parse::<i32>() {
        Ok(extended) => matches!(extended & 0xff, IOERR | CORRUPT | CANTOPEN | NOTADB),
        Err(_) => false,
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn ping(&self) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now')")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
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
        let row = sqlx::query(&format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(entry_from_row).transpose().map_err(classify)
    }

    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO entries (title, description, created_at) VALUES (?1, ?2, ?3) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry.title)
        .bind(entry.description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        entry_from_row(&row).map_err(classify)
    }

    async fn update(&self, id: i64, entry: NewEntry) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE entries SET title = ?1, description = ?2 WHERE id = ?3 RETURNING {}",
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
            "DELETE FROM entries WHERE id = ?1 RETURNING {}",
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
        tracing::debug!("closed sqlite pool for {}", self.path.display());
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SqliteConfig {
        SqliteConfig {
            path: dir.path().join("journal.db"),
            ..Default::default()
        }
    }

    async fn open(dir: &TempDir) -> Arc<dyn EntryStore> {
        SqliteConnector::new(config(dir)).connect().await.unwrap()
    }

    fn new_entry(title: &str, description: Option<&str>) -> NewEntry {
        NewEntry {
            title: title.to_string(),
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn test_default_config() {
        let config = SqliteConfig::default();
        assert_eq!(config.path, PathBuf::from("journal.db"));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_target() {
        let connector = SqliteConnector::new(SqliteConfig {
            path: PathBuf::from("/tmp/j.db"),
            ..Default::default()
        });
        assert_eq!(connector.target(), "sqlite:///tmp/j.db");
    }

    #[tokio::test]
    async fn test_connect_creates_file_and_schema() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        assert!(dir.path().join("journal.db").exists());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let connector = SqliteConnector::new(SqliteConfig {
            path: dir.path().join("nope").join("journal.db"),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        });

        assert!(matches!(
            connector.connect().await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_returns_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let now = store.ping().await.unwrap();
        assert!(now.parse::<DateTime<Utc>>().is_ok(), "{}", now);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let created = store
            .insert(new_entry("Morning run", Some("5km")))
            .await
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.title, "Morning run");

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        assert_eq!(store.get(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let first = store.insert(new_entry("first", None)).await.unwrap();
        let second = store.insert(new_entry("second", None)).await.unwrap();

        let ids: Vec<i64> = store.list().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_update() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let created = store.insert(new_entry("draft", Some("x"))).await.unwrap();
        let updated = store
            .update(created.id, new_entry("final", None))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "final");
        assert_eq!(updated.description, None);
        assert_eq!(updated.created_at, created.created_at);

        assert_eq!(store.update(999, new_entry("x", None)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let created = store.insert(new_entry("gone", None)).await.unwrap();
        let removed = store.delete(created.id).await.unwrap();
        assert_eq!(removed, Some(created.clone()));
        assert_eq!(store.delete(created.id).await.unwrap(), None);
        assert_eq!(store.get(created.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let created = store.insert(new_entry("kept", None)).await.unwrap();
        store.close().await;

        let reopened = open(&dir).await;
        assert_eq!(reopened.get(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_close_makes_queries_fail_as_connection_loss() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.close().await;
        let err = store.list().await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_bad_sql_is_query_error() {
        let dir = TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("journal.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();

        let err = sqlx::query("SELECT * FROM missing_table")
            .fetch_all(&pool)
            .await
            .err()
            .expect("query against a missing table should fail");
        assert!(matches!(classify(err), StoreError::Query(_)));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(sqlx::Error::PoolTimedOut), StoreError::Timeout);
        assert!(classify(sqlx::Error::PoolClosed).is_connection_loss());
        assert!(classify(sqlx::Error::WorkerCrashed).is_connection_loss());
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn test_connection_codes() {
        assert!(is_connection_code("14"));
        assert!(is_connection_code("10"));
        assert!(is_connection_code("1034")); // IOERR_FSYNC
        assert!(is_connection_code("26"));
        assert!(is_connection_code("11"));
        assert!(!is_connection_code("2067")); // CONSTRAINT_UNIQUE
        assert!(!is_connection_code("1"));
        assert!(!is_connection_code("SQLITE_ERROR"));
    }
}

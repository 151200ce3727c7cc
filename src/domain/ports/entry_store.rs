//! Entry Store Port
//!
//! Defines the query interface exposed by a live datastore resource.
//! Implementations may use PostgreSQL or SQLite.

use crate::domain::entities::{Entry, NewEntry};
use async_trait::async_trait;

/// Query interface of a connected datastore.
///
/// A store is produced by a [`Connector`](super::Connector) and owned by the
/// connection manager. Handlers only ever borrow it for the duration of a
/// query.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Run a trivial query and return the server's notion of "now".
    async fn ping(&self) -> Result<String, StoreError>;

    /// All entries, newest first.
    async fn list(&self) -> Result<Vec<Entry>, StoreError>;

    /// A single entry by id.
    async fn get(&self, id: i64) -> Result<Option<Entry>, StoreError>;

    /// Insert a new entry and return it with its assigned id.
    async fn insert(&self, entry: NewEntry) -> Result<Entry, StoreError>;

    /// Replace title and description of an existing entry.
    async fn update(&self, id: i64, entry: NewEntry) -> Result<Option<Entry>, StoreError>;

    /// Delete an entry, returning the removed row.
    async fn delete(&self, id: i64) -> Result<Option<Entry>, StoreError>;

    /// Release the underlying resource.
    async fn close(&self);
}

/// Datastore errors, classified by what the caller should do about them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The link to the datastore is gone; the handle must be re-established.
    #[error("connection error: {0}")]
    Connection(String),
    /// Acquiring a pooled connection took longer than the configured timeout.
    #[error("timed out waiting for a datastore connection")]
    Timeout,
    /// The statement itself failed.
    #[error("query error: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether this failure means the resource is unusable.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Whether the trivial liveness query failing this way means the
    /// datastore cannot be reached.
    ///
    /// A pool timeout counts: a pool whose server went away keeps retrying
    /// the connect until the acquire deadline and then reports a timeout.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout)
    }
}

/// SQL schema for the entries table (PostgreSQL dialect).
pub const ENTRIES_SCHEMA_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

/// SQL schema for the entries table (SQLite dialect).
pub const ENTRIES_SCHEMA_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL
)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert!(StoreError::Connection("reset".to_string())
            .to_string()
            .contains("connection error"));
        assert!(StoreError::Query("syntax".to_string())
            .to_string()
            .contains("query error"));
        assert!(StoreError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn test_is_connection_loss() {
        assert!(StoreError::Connection("eof".to_string()).is_connection_loss());
        assert!(!StoreError::Timeout.is_connection_loss());
        assert!(!StoreError::Query("bad".to_string()).is_connection_loss());
    }

    #[test]
    fn test_is_unreachable() {
        assert!(StoreError::Connection("refused".to_string()).is_unreachable());
        assert!(StoreError::Timeout.is_unreachable());
        assert!(!StoreError::Query("syntax".to_string()).is_unreachable());
    }

    #[test]
    fn test_schemas() {
        for schema in [ENTRIES_SCHEMA_POSTGRES, ENTRIES_SCHEMA_SQLITE] {
            assert!(schema.contains("CREATE TABLE IF NOT EXISTS entries"));
            assert!(schema.contains("title"));
            assert!(schema.contains("created_at"));
        }
    }
}

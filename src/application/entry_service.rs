//! Entry Service - Journal use cases
//!
//! Validates payloads and runs every query through the connection manager,
//! so handlers never touch the datastore handle directly.

use crate::domain::entities::{Entry, EntryInput};
use crate::error::AppError;
use crate::infrastructure::ConnectionManager;
use std::sync::Arc;

/// CRUD over journal entries.
#[derive(Clone)]
pub struct EntryService {
    db: Arc<ConnectionManager>,
}

fn entry_not_found() -> AppError {
    AppError::not_found("entry not found")
}

impl EntryService {
    pub fn new(db: Arc<ConnectionManager>) -> Self {
        Self { db }
    }

    /// All entries, newest first.
    pub async fn list(&self) -> Result<Vec<Entry>, AppError> {
        self.db.execute(|store| async move { store.list().await }).await
    }

    pub async fn get(&self, id: i64) -> Result<Entry, AppError> {
        self.db
            .execute(|store| async move { store.get(id).await })
            .await?
            .ok_or_else(entry_not_found)
    }

    /// Validate and insert. Nothing is written when validation fails.
    pub async fn create(&self, input: EntryInput) -> Result<Entry, AppError> {
        let entry = input.validate()?;
        let created = self
            .db
            .execute(|store| async move { store.insert(entry).await })
            .await?;
        tracing::debug!("created entry {}", created.id);
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: EntryInput) -> Result<Entry, AppError> {
        let entry = input.validate()?;
        self.db
            .execute(|store| async move { store.update(id, entry).await })
            .await?
            .ok_or_else(entry_not_found)
    }

    /// Delete and return the removed entry.
    pub async fn delete(&self, id: i64) -> Result<Entry, AppError> {
        let removed = self
            .db
            .execute(|store| async move { store.delete(id).await })
            .await?
            .ok_or_else(entry_not_found)?;
        tracing::debug!("deleted entry {}", removed.id);
        Ok(removed)
    }
}

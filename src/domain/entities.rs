//! Domain Entities - Core business objects
//!
//! These entities represent the journal and the identity carried in tokens.
//! They have no knowledge of the datastore or the HTTP layer.

use crate::domain::value_objects::Role;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A journal entry as stored in the `entries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Datastore-assigned identifier
    pub id: i64,
    /// Short title, never blank
    pub title: String,
    /// Optional free-form body
    pub description: Option<String>,
    /// When the row was inserted
    pub created_at: DateTime<Utc>,
}

/// A validated entry payload ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub title: String,
    pub description: Option<String>,
}

/// Raw entry payload as received from a client.
///
/// Every field is optional so that a missing title is reported as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl EntryInput {
    /// Validate the payload.
    ///
    /// The title is trimmed and must not be empty. A blank description is
    /// stored as NULL.
    pub fn validate(self) -> Result<NewEntry, AppError> {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::validation("title is required"))?;

        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(NewEntry { title, description })
    }
}

/// Claims carried in a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub username: String,
    pub role: Role,
    /// Issued at (seconds since epoch)
    pub iat: u64,
    /// Expiry (seconds since epoch)
    pub exp: u64,
}

impl Claims {
    /// Check whether these claims grant `required`.
    pub fn require_role(&self, required: Role) -> Result<(), AppError> {
        if self.role.grants(required) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role '{}' is not allowed to perform this action",
                self.role.as_str()
            )))
        }
    }
}

/// The single account allowed to log in.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    /// Argon2 hash in PHC string format
    pub password_hash: String,
    pub role: Role,
}

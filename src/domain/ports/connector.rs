//! Connector Port
//!
//! Defines how a datastore resource is established.

use super::entry_store::{EntryStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;

/// Factory for live datastore resources.
///
/// The connection manager calls [`connect`](Connector::connect) once per
/// attempt. Implementations carry the connection parameters and pool sizing;
/// a failed attempt must not leave anything behind.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a pooled resource.
    async fn connect(&self) -> Result<Arc<dyn EntryStore>, StoreError>;

    /// Human-readable target for logs (never includes credentials).
    fn target(&self) -> String;
}

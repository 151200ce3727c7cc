//! journal-api Library
//!
//! This module exposes the journal service components for use in
//! integration tests and by the binary.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{router, ApiServer, AppState, BuildInfo};
pub use adapters::outbound::{PostgresConnector, PrometheusMetricsStore, SqliteConnector};
pub use application::EntryService;
pub use config::{load_config, Config, DbDriver};
pub use domain::entities::{Claims, Entry, EntryInput, NewEntry};
pub use domain::ports::{Connector, EntryStore, MetricsStore, StoreError};
pub use domain::services::{AuthService, TokenService};
pub use domain::value_objects::{ConnectionState, RetryConfig, RetryPolicy, Role};
pub use error::AppError;
pub use infrastructure::{ConnectionError, ConnectionManager, ShutdownController};

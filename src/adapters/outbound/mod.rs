mod postgres_entry_store;
mod prometheus_metrics_store;
mod sqlite_entry_store;

pub use postgres_entry_store::{PgEntryStore, PostgresConfig, PostgresConnector};
pub use prometheus_metrics_store::{PrometheusMetricsStore, RequestSeries, LATENCY_BUCKETS};
pub use sqlite_entry_store::{SqliteConfig, SqliteConnector, SqliteEntryStore};

mod connector;
mod entry_store;
mod metrics_store;

pub use connector::Connector;
pub use entry_store::{EntryStore, StoreError, ENTRIES_SCHEMA_POSTGRES, ENTRIES_SCHEMA_SQLITE};
pub use metrics_store::{MetricsStore, RequestLabels};

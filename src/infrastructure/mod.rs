//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod connection_manager;
pub mod shutdown;

pub use connection_manager::{ConnectionError, ConnectionManager, ConnectionSnapshot};
pub use shutdown::{shutdown_signal, RequestGuard, ShutdownController};

//! Adapters Layer
//!
//! Inbound adapters drive the application (HTTP); outbound adapters
//! implement the domain ports (datastores, metrics).

pub mod inbound;
pub mod outbound;

//! Application Layer
//!
//! Use cases that orchestrate domain logic and outbound ports.

mod entry_service;

pub use entry_service::EntryService;

//! Domain Layer
//!
//! Entities, value objects, ports and pure services. Nothing in here knows
//! about HTTP or a concrete datastore.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

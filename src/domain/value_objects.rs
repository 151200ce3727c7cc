//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role carried in a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, including updates and deletes
    Admin,
    /// May read and create entries
    #[default]
    User,
}

impl Role {
    /// Parse a role from a string (unknown roles fall back to `User`).
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: Role) -> bool {
        match required {
            Role::User => true,
            Role::Admin => *self == Role::Admin,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of the datastore connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No resource and no attempt in progress
    #[default]
    Disconnected,
    /// A connect cycle is running (possibly sleeping between attempts)
    Connecting,
    /// A usable resource is installed
    Connected,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 3] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How many connect attempts a cycle may make before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry forever; the process never fails on datastore outages.
    Unbounded,
    /// Give up after `max_attempts`; exhaustion is fatal to the process.
    Bounded { max_attempts: u32 },
}

impl RetryPolicy {
    /// Build a policy from a configured attempt budget (`0` means unbounded).
    pub fn from_max_attempts(max_attempts: u32) -> Self {
        if max_attempts == 0 {
            Self::Unbounded
        } else {
            Self::Bounded { max_attempts }
        }
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded { max_attempts } => attempts < *max_attempts,
        }
    }
}

/// Retry loop configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Fixed sleep between attempts
    pub interval: Duration,
    pub policy: RetryPolicy,
    /// How often a connected handle is probed with a trivial query
    pub probe_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            policy: RetryPolicy::Unbounded,
            probe_interval: Duration::from_secs(10),
        }
    }
}

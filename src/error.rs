//! Application Error Taxonomy
//!
//! Every handler-level failure is one of these variants. The inbound HTTP
//! adapter maps each variant to a status code and a minimal `{error}` body.

/// Errors surfaced by the application layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// The datastore is unreachable right now (disconnected, reconnecting,
    /// or the pool timed out).
    #[error("database unavailable")]
    ConnectionUnavailable,
    /// The request payload is missing a required field or is malformed.
    #[error("{0}")]
    Validation(String),
    /// The addressed entity does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Missing, malformed, invalid or expired credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// Authenticated, but the role does not permit the operation.
    #[error("{0}")]
    Forbidden(String),
    /// Unexpected failure; the message is logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a missing entity.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Shorthand for an authentication failure.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Message safe to return to clients.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AppError::ConnectionUnavailable.to_string(), "database unavailable");
        assert_eq!(AppError::validation("title is required").to_string(), "title is required");
        assert_eq!(AppError::not_found("entry not found").to_string(), "entry not found");
        assert!(AppError::Internal("boom".into()).to_string().contains("boom"));
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::Internal("relation \"entries\" does not exist".into());
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(
            AppError::unauthorized("Invalid credentials").public_message(),
            "Invalid credentials"
        );
    }
}

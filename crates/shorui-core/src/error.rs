//! Unified error types for Shorui

use thiserror::Error;

use crate::types::{ExecutionFailure, UserId};

/// Message shown to callers for every pipeline failure.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to generate document";

/// Unified error type for all Shorui operations
#[derive(Error, Debug)]
pub enum ShoruiError {
    // Request errors
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Monthly document limit reached for user {user_id} ({used}/{limit})")]
    QuotaExceeded {
        user_id: UserId,
        used: u32,
        limit: u32,
    },

    // Pipeline errors
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Execution failed: {0}")]
    Execution(ExecutionFailure),

    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    // Storage errors
    #[error("Unsafe filename: {0}")]
    PathValidation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // External service errors
    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ShoruiError {
    /// True when the caller sent something we refuse outright
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::PathValidation(_) | Self::NotFound(_))
    }

    /// True for the quota-exceeded outcome
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Text that is safe to hand back to a caller.
    ///
    /// Pipeline failures collapse to a single generic message so that
    /// interpreter output and filesystem paths stay in the server logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::QuotaExceeded { .. } => "Monthly document limit reached".to_string(),
            Self::NotFound(_) => "Document not found".to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Result type alias using ShoruiError
pub type Result<T> = std::result::Result<T, ShoruiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_pipeline_details() {
        let err = ShoruiError::Execution(ExecutionFailure::NonZeroExit { code: 1 });
        assert_eq!(err.public_message(), GENERIC_FAILURE_MESSAGE);

        let err = ShoruiError::Storage("/srv/documents/.scratch is read-only".to_string());
        assert!(!err.public_message().contains("/srv"));

        let err = ShoruiError::Parse("no executable snippet found".to_string());
        assert_eq!(err.public_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_public_message_keeps_request_errors() {
        let err = ShoruiError::Validation("Topic is required".to_string());
        assert_eq!(err.public_message(), "Topic is required");
        assert!(err.is_client_error());

        let err = ShoruiError::QuotaExceeded {
            user_id: "u1".to_string(),
            used: 10,
            limit: 10,
        };
        assert_eq!(err.public_message(), "Monthly document limit reached");
        assert!(err.is_rate_limited());
        assert!(!err.is_client_error());
    }
}

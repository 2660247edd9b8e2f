//! Custom error types for envelope-exchange
//!
//! This module defines the error hierarchy for the job engine using thiserror.
//! Request-shape problems, ownership checks and back-pressure are ordinary
//! values of [`ExchangeError`]; per-record failures during an import are not
//! errors at all but data collected into the operation's report.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{OperationKind, OperationStatus};

/// The main error type for envelope-exchange operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Malformed request (bad format/type combination, bad options payload)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The import payload cannot be parsed at all
    #[error("Unreadable {format} payload: {reason}")]
    StructuralDecode { format: String, reason: String },

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Requester does not own the entity
    #[error("Access to {entity_type} {identifier} is forbidden")]
    Forbidden {
        entity_type: &'static str,
        identifier: String,
    },

    /// Owner already has too many in-flight operations of this kind
    #[error("Too many concurrent {kind} operations (limit {limit}), retry later")]
    TooManyConcurrentOperations { kind: OperationKind, limit: usize },

    /// Attempted status change violates the operation state machine
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Operation has already reached a terminal status
    #[error("Operation {0} has already finished")]
    AlreadyTerminal(String),

    /// Encoder/decoder failures outside the structural-decode case
    #[error("Codec error: {0}")]
    Codec(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Create a "not found" error for operations
    pub fn operation_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Operation",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for artifacts
    pub fn artifact_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Artifact",
            identifier: identifier.into(),
        }
    }

    /// Create a "forbidden" error for operations
    pub fn operation_forbidden(identifier: impl Into<String>) -> Self {
        Self::Forbidden {
            entity_type: "Operation",
            identifier: identifier.into(),
        }
    }

    /// Create a "forbidden" error for artifacts
    pub fn artifact_forbidden(identifier: impl Into<String>) -> Self {
        Self::Forbidden {
            entity_type: "Artifact",
            identifier: identifier.into(),
        }
    }

    /// Create a structural decode error for a format
    pub fn structural(format: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::StructuralDecode {
            format: format.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a "forbidden" error
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a back-pressure rejection
    pub fn is_too_many(&self) -> bool {
        matches!(self, Self::TooManyConcurrentOperations { .. })
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::StructuralDecode { .. } => ErrorCode::StructuralDecode,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::TooManyConcurrentOperations { .. } => ErrorCode::TooManyConcurrentOperations,
            Self::IllegalTransition { .. } => ErrorCode::IllegalTransition,
            Self::AlreadyTerminal(_) => ErrorCode::AlreadyTerminal,
            Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Codec(_)
            | Self::Storage(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Summary safe to persist in an operation result.
    ///
    /// Internal failures are redacted; the full cause belongs in the log only.
    pub fn redacted(&self) -> OperationError {
        let code = self.code();
        let message = match code {
            ErrorCode::Internal => "The operation failed due to an internal error".to_string(),
            _ => self.to_string(),
        };
        OperationError { code, message }
    }
}

/// Machine-readable error codes stored in operation results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    StructuralDecode,
    NotFound,
    Forbidden,
    TooManyConcurrentOperations,
    IllegalTransition,
    AlreadyTerminal,
    Interrupted,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::StructuralDecode => "structural_decode",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::TooManyConcurrentOperations => "too_many_concurrent_operations",
            Self::IllegalTransition => "illegal_transition",
            Self::AlreadyTerminal => "already_terminal",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Structured error recorded in a failed operation's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<csv::Error> for ExchangeError {
    fn from(err: csv::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type alias for envelope-exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExchangeError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = ExchangeError::operation_not_found("op-1234abcd");
        assert_eq!(err.to_string(), "Operation not found: op-1234abcd");
        assert!(err.is_not_found());
        assert!(!err.is_forbidden());
    }

    #[test]
    fn test_too_many_error() {
        let err = ExchangeError::TooManyConcurrentOperations {
            kind: OperationKind::Export,
            limit: 3,
        };
        assert_eq!(
            err.to_string(),
            "Too many concurrent export operations (limit 3), retry later"
        );
        assert_eq!(err.code(), ErrorCode::TooManyConcurrentOperations);
    }

    #[test]
    fn test_internal_errors_are_redacted() {
        let err = ExchangeError::Io("/home/alice/secret/path: permission denied".into());
        let summary = err.redacted();
        assert_eq!(summary.code, ErrorCode::Internal);
        assert!(!summary.message.contains("alice"));

        let err = ExchangeError::structural("xlsx", "corrupt archive");
        let summary = err.redacted();
        assert_eq!(summary.code, ErrorCode::StructuralDecode);
        assert!(summary.message.contains("corrupt archive"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExchangeError = io_err.into();
        assert!(matches!(err, ExchangeError::Io(_)));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::StructuralDecode).unwrap();
        assert_eq!(json, "\"structural_decode\"");
    }
}

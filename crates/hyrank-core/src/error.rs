//! Error types for hyrank.

use thiserror::Error;

use crate::types::StrategyKind;

/// Result type alias using HyrankError.
pub type Result<T> = std::result::Result<T, HyrankError>;

/// Errors that can occur in hyrank.
#[derive(Error, Debug)]
pub enum HyrankError {
    /// Record not found.
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Query vector length does not match the indexed embeddings.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A strategy is temporarily unavailable.
    #[error("{strategy} strategy unavailable: {message}")]
    StrategyUnavailable {
        strategy: StrategyKind,
        message: String,
    },

    /// A strategy is misconfigured and retrying will not help.
    #[error("{strategy} strategy misconfigured: {message}")]
    StrategyMisconfigured {
        strategy: StrategyKind,
        message: String,
    },

    /// Every dispatched strategy failed.
    #[error("No strategy available: {}", failures.join("; "))]
    NoStrategyAvailable { failures: Vec<String> },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HyrankError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a strategy-unavailable error.
    pub fn unavailable(strategy: StrategyKind, message: impl Into<String>) -> Self {
        Self::StrategyUnavailable {
            strategy,
            message: message.into(),
        }
    }

    /// Create a strategy-misconfigured error.
    pub fn misconfigured(strategy: StrategyKind, message: impl Into<String>) -> Self {
        Self::StrategyMisconfigured {
            strategy,
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a failed strategy call may succeed on a later attempt.
    ///
    /// Transient failures are absorbed by the search engine; everything else
    /// is surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StrategyUnavailable { .. }
                | Self::Database { .. }
                | Self::Io(_)
                | Self::Internal { .. }
        )
    }

    /// Get the error code for machine-readable responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::StrategyUnavailable { .. } => "STRATEGY_UNAVAILABLE",
            Self::StrategyMisconfigured { .. } => "STRATEGY_MISCONFIGURED",
            Self::NoStrategyAvailable { .. } => "NO_STRATEGY_AVAILABLE",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HyrankError::RecordNotFound {
            id: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));

        let err = HyrankError::DimensionMismatch {
            expected: 768,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Vector dimension mismatch: expected 768, got 3"
        );
    }

    #[test]
    fn test_no_strategy_lists_failures() {
        let err = HyrankError::NoStrategyAvailable {
            failures: vec!["keyword: down".to_string(), "fuzzy: down".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No strategy available: keyword: down; fuzzy: down"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(HyrankError::unavailable(StrategyKind::Keyword, "busy").is_transient());
        assert!(HyrankError::database("locked").is_transient());

        assert!(!HyrankError::misconfigured(StrategyKind::Semantic, "bad").is_transient());
        assert!(!HyrankError::DimensionMismatch {
            expected: 4,
            actual: 3
        }
        .is_transient());
        assert!(!HyrankError::invalid_argument("nope").is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            HyrankError::RecordNotFound {
                id: "x".to_string()
            }
            .error_code(),
            "RECORD_NOT_FOUND"
        );
        assert_eq!(HyrankError::database("test").error_code(), "DATABASE_ERROR");
        assert_eq!(
            HyrankError::NoStrategyAvailable { failures: vec![] }.error_code(),
            "NO_STRATEGY_AVAILABLE"
        );
    }
}

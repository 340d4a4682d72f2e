//! Error types for Steward Core
//!
//! This module defines all error types used throughout the decision engine.
//! We use `thiserror` for ergonomic error definitions with automatic
//! Display/Error implementations.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Steward operations
pub type Result<T> = std::result::Result<T, StewardError>;

/// Main error type for Steward operations
#[derive(Error, Debug)]
pub enum StewardError {
    /// Knowledge-store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Learning pipeline errors
    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    /// Malformed or insufficient input, rejected without retry
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An upstream collaborator (business backend, portfolio feed)
    /// failed; transient classes are retried by the transport layer
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        /// What the caller was doing
        context: String,
        /// Underlying error
        source: Box<StewardError>,
    },
}

/// Errors raised by the knowledge store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The referenced decision does not exist for this user
    #[error("Decision not found: {0}")]
    DecisionNotFound(Uuid),

    /// Owner feedback has already been set on this decision
    #[error("Feedback already recorded for decision {0}")]
    FeedbackAlreadySet(Uuid),

    /// The referenced rule does not exist
    #[error("Rule not found: {0}")]
    RuleNotFound(Uuid),

    /// A stored column failed to parse back into its typed form
    #[error("Corrupt column {column}: {detail}")]
    CorruptColumn {
        /// Column name
        column: &'static str,
        /// Parse failure detail
        detail: String,
    },
}

/// Errors raised at the embedding boundary
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Vector length does not match the engine's fixed dimensionality
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Required dimensionality
        expected: usize,
        /// Observed length
        actual: usize,
    },

    /// The external provider failed
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// A write that requires an embedding was attempted without one.
    /// Rules, preferences and corrections always carry a vector; a failed
    /// or empty embedding fails the whole write.
    #[error("Embedding required for {0} but none was produced")]
    MissingEmbedding(&'static str),
}

/// Errors raised by the learning pipeline
#[derive(Error, Debug, Clone)]
pub enum LearningError {
    /// The learning action name is not one of the known entry actions
    #[error("Unknown learning action: {0}")]
    UnknownAction(String),

    /// A correction must carry non-empty text
    #[error("Correction text is empty")]
    EmptyCorrection,
}

impl StewardError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = StoreError::DecisionNotFound(Uuid::new_v4());
        let err = StewardError::from(err);
        let err = err.context("Failed to apply feedback");

        assert!(err.to_string().contains("Failed to apply feedback"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(LearningError::EmptyCorrection.into());
        let result = result.context("Correction rejected");

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Correction rejected"));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = EmbeddingError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert!(err.to_string().contains("384"));
    }
}

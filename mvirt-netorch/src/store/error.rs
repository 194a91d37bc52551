//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write would violate a referential or counter constraint.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

//! Error types for field and operator construction.

use thiserror::Error;

/// Errors raised while building fields or operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Lattice extents or site layout are unusable.
    #[error("Invalid lattice geometry: {0}")]
    InvalidGeometry(String),

    /// Storage length does not match the geometry.
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Operator data could not be assembled.
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),
}

/// Result type for field operations.
pub type Result<T> = std::result::Result<T, FieldError>;

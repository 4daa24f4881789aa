//! Error types for solver construction and invocation.

use krylat_field::{FieldError, LatticeGeometry};
use thiserror::Error;

use crate::param::SolverKind;

/// Errors that can occur while building or invoking a solver.
///
/// Numerical breakdown and running out of iterations are not errors; they
/// are reported through [`SolverStatus`](crate::SolverStatus).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The algorithm name is not recognised.
    #[error("Unknown solver type: {0}")]
    UnknownSolver(String),

    /// The algorithm exists but cannot serve the requested contract.
    #[error("{0} cannot be constructed through this interface")]
    UnsupportedSolver(SolverKind),

    /// Operators or fields disagree on lattice layout.
    #[error("Geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch {
        expected: LatticeGeometry,
        actual: LatticeGeometry,
    },

    /// A configuration knob is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The chronological projection matrix could not be inverted.
    #[error("Singular projection matrix in chronological extrapolation")]
    SingularProjection,

    /// Field or operator construction failed.
    #[error("Field error: {0}")]
    Field(#[from] FieldError),
}

/// Result type for solver operations.
pub type Result<T> = std::result::Result<T, Error>;

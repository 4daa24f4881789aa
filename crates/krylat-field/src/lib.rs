//! Lattice fields and matrix-free operators for the Krylat solvers.
//!
//! This crate is the layer the Krylov solvers are written against:
//!
//! - [`LatticeGeometry`] - lattice extents and per-site layout
//! - [`Precision`] - storage precision tags with emulated rounding
//! - [`FieldVector`] - complex fields with the level-1 BLAS the solvers need
//! - [`LinearOperator`] / [`AdjointOperator`] - matrix-free operator traits
//! - reference operators: [`StencilOperator`], [`SparseOperator`],
//!   [`DenseOperator`], [`DiagonalOperator`] and the adapters
//!   [`ShiftedOperator`], [`NormalOperator`], [`PrecisionOperator`]

pub mod blas;
pub mod dense;
pub mod error;
pub mod field;
pub mod geometry;
pub mod operator;
pub mod precision;
pub mod sparse_operator;
pub mod stencil;

pub use dense::{DenseOperator, DiagonalOperator};
pub use error::{FieldError, Result};
pub use field::FieldVector;
pub use geometry::{LatticeGeometry, NDIM};
pub use operator::{
    AdjointOperator, LinearOperator, NormalOperator, PrecisionOperator, ShiftedOperator,
};
pub use precision::Precision;
pub use sparse_operator::SparseOperator;
pub use stencil::StencilOperator;

pub use num_complex::Complex64 as C64;

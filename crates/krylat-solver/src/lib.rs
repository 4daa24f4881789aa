//! Krylov solvers for lattice operators.
//!
//! # Solvers
//!
//! - [`Cg`] - conjugate gradient with mixed-precision reliable updates
//! - [`SimpleCg`] - fixed-precision CG for inner solves
//! - [`PreconCg`] - flexible CG with an inner-solver preconditioner
//! - [`BiCgStab`] - stabilized biconjugate gradient for non-Hermitian operators
//! - [`Gcr`] - flexible generalized conjugate residual with restarts
//! - [`Mr`] - minimal residual
//! - [`MultiShiftCg`] - one Krylov space for a family of shifted systems
//!
//! Single right-hand-side solvers are built from an [`InvertParam`] by the
//! [`create`] factory. Around them sit the initial-guess builders
//! [`MinResExt`] / [`ChronoBasis`] and [`poly_mass_ext`], and the multigrid
//! null-space setup [`AlphaSa`].
//!
//! # Example
//!
//! ```ignore
//! use krylat_field::{FieldVector, LatticeGeometry, Precision, StencilOperator};
//! use krylat_solver::{InvertParam, Solver, SolverKind, TimeProfile, create};
//!
//! let geometry = LatticeGeometry::new([8, 8, 8, 8], 12)?;
//! let op = StencilOperator::new(geometry, 0.1);
//! let param = InvertParam::for_solver(SolverKind::Cg).with_tol(1e-10);
//!
//! let mut profile = TimeProfile::new("main");
//! let mut solver = create(&param, &op, &op, &op, &mut profile)?;
//! let b = FieldVector::point_source(geometry, Precision::Double, 0);
//! let mut x = b.similar();
//! let outcome = solver.solve(&mut x, &b, &mut profile)?;
//! ```

pub mod alpha_sa;
pub mod bicgstab;
pub mod cg;
pub mod error;
pub mod gcr;
pub mod min_res_ext;
pub mod mr;
pub mod multi_shift;
pub mod param;
pub mod poly_mass_ext;
pub mod precon_cg;
pub mod profile;
pub mod reliable;
pub mod simple_cg;
pub mod solver;

pub use alpha_sa::{AlphaSa, Aggregation, NullSpaceSetup};
pub use bicgstab::BiCgStab;
pub use cg::Cg;
pub use error::{Error, Result};
pub use gcr::Gcr;
pub use min_res_ext::{ChronoBasis, MinResExt};
pub use mr::Mr;
pub use multi_shift::{MultiShiftCg, MultiShiftOutcome, MultiShiftSolver, ShiftOutcome};
pub use param::{InvertParam, SolverKind};
pub use poly_mass_ext::{lagrange_weights, poly_mass_ext};
pub use precon_cg::PreconCg;
pub use profile::{TimeProfile, interval};
pub use reliable::ReliableUpdates;
pub use simple_cg::SimpleCg;
pub use solver::{AnySolver, SolveOutcome, Solver, SolverStatus, create};

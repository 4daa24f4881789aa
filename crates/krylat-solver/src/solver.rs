//! The solver contract and factory.
//!
//! Every single right-hand-side algorithm implements [`Solver`]. The
//! [`create`] factory picks the algorithm named by
//! [`InvertParam::inv_type`] and returns it as an [`AnySolver`], a closed
//! enum, so the per-iteration path never goes through a vtable.
//!
//! Solvers borrow three operator variants for their whole lifetime: the
//! full-precision operator, the sloppy operator the recurrences run
//! against, and the preconditioning operator used by inner solves. All
//! scratch fields are allocated when the solver is built and reused by
//! every call to [`Solver::solve`].

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator, Precision};

use crate::bicgstab::BiCgStab;
use crate::cg::Cg;
use crate::error::{Error, Result};
use crate::gcr::Gcr;
use crate::mr::Mr;
use crate::param::{InvertParam, SolverKind};
use crate::precon_cg::PreconCg;
use crate::profile::{TimeProfile, interval};
use crate::simple_cg::SimpleCg;

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// The iterated residual met the tolerance.
    Converged,
    /// The iteration budget ran out first.
    MaxIterations,
    /// A recurrence denominator vanished and the solve could not continue.
    Breakdown,
}

impl SolverStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolverStatus::Converged)
    }
}

/// Diagnostics of a single solve.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    /// Terminal state.
    pub status: SolverStatus,
    /// Iterations performed.
    pub iterations: usize,
    /// True relative residual `|b - A x| / |b|`, computed in full precision.
    pub residual: f64,
    /// Iterated relative residual, starting with the initial guess.
    pub history: Vec<f64>,
    /// Wall-clock seconds.
    pub secs: f64,
}

impl SolveOutcome {
    /// The outcome of a zero right-hand side.
    pub fn trivial() -> Self {
        Self {
            status: SolverStatus::Converged,
            iterations: 0,
            residual: 0.0,
            history: Vec::new(),
            secs: 0.0,
        }
    }

    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    /// Write the diagnostics back into `param`.
    pub fn record(&self, param: &mut InvertParam) {
        param.true_res = self.residual;
        param.iter = self.iterations;
        param.secs = self.secs;
    }
}

/// A single right-hand-side solver.
pub trait Solver {
    /// Algorithm implemented by this solver.
    fn kind(&self) -> SolverKind;

    /// Parameters, including the diagnostics of the last solve.
    fn param(&self) -> &InvertParam;

    /// Solve `A out = input`, using the contents of `out` as initial guess.
    ///
    /// `input` is never modified. Geometry mismatches are reported before
    /// any field is touched.
    fn solve(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<SolveOutcome>;

    /// Like [`solve`](Self::solve), returning a private profile with the
    /// elapsed-time breakdown.
    fn solve_timed(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
    ) -> Result<(SolveOutcome, TimeProfile)> {
        let mut profile = TimeProfile::new(self.kind().name());
        let outcome = self.solve(out, input, &mut profile)?;
        Ok((outcome, profile))
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Any of the single right-hand-side solvers.
pub enum AnySolver<'a> {
    Cg(Cg<'a>),
    SimpleCg(SimpleCg<'a>),
    PreconCg(PreconCg<'a>),
    BiCgStab(BiCgStab<'a>),
    Gcr(Gcr<'a>),
    Mr(Mr<'a>),
}

/// Build the solver named by `param.inv_type`.
///
/// Fails for invalid parameters, for operators that disagree on geometry
/// or precision, and for [`SolverKind::MultiShiftCg`], which has its own
/// contract ([`MultiShiftSolver`](crate::MultiShiftSolver)).
pub fn create<'a>(
    param: &InvertParam,
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    mat_precon: &'a dyn LinearOperator,
    profile: &mut TimeProfile,
) -> Result<AnySolver<'a>> {
    profile.start(interval::INIT);
    let solver = build(param, mat, mat_sloppy, mat_precon);
    profile.stop(interval::INIT);
    let solver = solver?;
    log::debug!("created {} solver", solver.kind());
    Ok(solver)
}

fn build<'a>(
    param: &InvertParam,
    mat: &'a dyn LinearOperator,
    mat_sloppy: &'a dyn LinearOperator,
    mat_precon: &'a dyn LinearOperator,
) -> Result<AnySolver<'a>> {
    Ok(match param.inv_type {
        SolverKind::Cg => AnySolver::Cg(Cg::new(mat, mat_sloppy, param.clone())?),
        SolverKind::SimpleCg => AnySolver::SimpleCg(SimpleCg::new(mat, param.clone())?),
        SolverKind::PreconCg => {
            AnySolver::PreconCg(PreconCg::new(mat, mat_sloppy, mat_precon, param.clone())?)
        }
        SolverKind::BiCgStab => {
            AnySolver::BiCgStab(BiCgStab::new(mat, mat_sloppy, mat_precon, param.clone())?)
        }
        SolverKind::Gcr => AnySolver::Gcr(Gcr::new(mat, mat_sloppy, mat_precon, param.clone())?),
        SolverKind::Mr => AnySolver::Mr(Mr::new(mat, param.clone())?),
        SolverKind::MultiShiftCg => return Err(Error::UnsupportedSolver(param.inv_type)),
    })
}

/// Build the inner preconditioner solve configured in `param`, if any.
///
/// The inner solver runs entirely on `mat_precon`.
pub(crate) fn create_preconditioner<'a>(
    param: &InvertParam,
    mat_precon: &'a dyn LinearOperator,
) -> Result<Option<Box<AnySolver<'a>>>> {
    match param.preconditioner() {
        Some(inner) => {
            let solver = build(&inner, mat_precon, mat_precon, mat_precon)?;
            Ok(Some(Box::new(solver)))
        }
        None => Ok(None),
    }
}

impl<'a> AnySolver<'a> {
    fn inner(&mut self) -> &mut dyn Solver {
        match self {
            AnySolver::Cg(s) => s,
            AnySolver::SimpleCg(s) => s,
            AnySolver::PreconCg(s) => s,
            AnySolver::BiCgStab(s) => s,
            AnySolver::Gcr(s) => s,
            AnySolver::Mr(s) => s,
        }
    }

    fn inner_ref(&self) -> &dyn Solver {
        match self {
            AnySolver::Cg(s) => s,
            AnySolver::SimpleCg(s) => s,
            AnySolver::PreconCg(s) => s,
            AnySolver::BiCgStab(s) => s,
            AnySolver::Gcr(s) => s,
            AnySolver::Mr(s) => s,
        }
    }
}

impl<'a> Solver for AnySolver<'a> {
    fn kind(&self) -> SolverKind {
        self.inner_ref().kind()
    }

    fn param(&self) -> &InvertParam {
        self.inner_ref().param()
    }

    fn solve(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<SolveOutcome> {
        self.inner().solve(out, input, profile)
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Check that every operator acts on one geometry and carries the
/// precision `param` declares for it.
pub(crate) fn check_operators(
    param: &InvertParam,
    mat: &dyn LinearOperator,
    mat_sloppy: &dyn LinearOperator,
    mat_precon: Option<&dyn LinearOperator>,
) -> Result<LatticeGeometry> {
    let geometry = mat.geometry();
    check_precision("full", param.precision, mat.precision())?;
    check_geometry(geometry, mat_sloppy.geometry())?;
    check_precision("sloppy", param.precision_sloppy, mat_sloppy.precision())?;
    if let Some(mat_precon) = mat_precon {
        check_geometry(geometry, mat_precon.geometry())?;
        check_precision(
            "preconditioner",
            param.precision_precondition,
            mat_precon.precision(),
        )?;
    }
    Ok(geometry)
}

fn check_precision(role: &str, expected: Precision, actual: Precision) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidConfig(format!(
            "{} operator is {} precision but {} was requested",
            role, actual, expected
        )));
    }
    Ok(())
}

pub(crate) fn check_geometry(expected: LatticeGeometry, actual: LatticeGeometry) -> Result<()> {
    if expected != actual {
        return Err(Error::GeometryMismatch { expected, actual });
    }
    Ok(())
}

/// Check the caller's fields against the solver geometry.
pub(crate) fn check_fields(
    geometry: LatticeGeometry,
    out: &FieldVector,
    input: &FieldVector,
) -> Result<()> {
    check_geometry(geometry, input.geometry())?;
    check_geometry(geometry, out.geometry())
}

/// Whether `value` is too small relative to `scale` to divide by safely.
pub(crate) fn vanishes(value: f64, scale: f64, precision: Precision) -> bool {
    !value.is_finite() || value.abs() <= precision.epsilon() * scale
}

/// True relative residual of `x`; `scratch` is overwritten.
pub(crate) fn true_residual(
    mat: &dyn LinearOperator,
    x: &FieldVector,
    b: &FieldVector,
    b2: f64,
    scratch: &mut FieldVector,
) -> f64 {
    mat.apply(x, scratch);
    (scratch.xmy_norm(b) / b2).sqrt()
}

/// Book-keeping shared by the end of every solve.
pub(crate) struct Finish {
    pub status: SolverStatus,
    pub iterations: usize,
    pub residual: f64,
    pub history: Vec<f64>,
    pub started: Instant,
}

impl Finish {
    /// Log the result and record it in `param`.
    pub(crate) fn report(self, kind: SolverKind, param: &mut InvertParam) -> SolveOutcome {
        let outcome = SolveOutcome {
            status: self.status,
            iterations: self.iterations,
            residual: self.residual,
            history: self.history,
            secs: self.started.elapsed().as_secs_f64(),
        };
        match outcome.status {
            SolverStatus::Converged => log::info!(
                "{}: converged in {} iterations, |r|/|b| = {:e}",
                kind,
                outcome.iterations,
                outcome.residual
            ),
            SolverStatus::MaxIterations => log::warn!(
                "{}: no convergence after {} iterations, |r|/|b| = {:e}",
                kind,
                outcome.iterations,
                outcome.residual
            ),
            SolverStatus::Breakdown => log::warn!(
                "{}: breakdown after {} iterations, |r|/|b| = {:e}",
                kind,
                outcome.iterations,
                outcome.residual
            ),
        }
        outcome.record(param);
        outcome
    }
}

/// Handle a zero right-hand side: `out = 0`, trivially converged.
pub(crate) fn trivial_solve(
    kind: SolverKind,
    out: &mut FieldVector,
    param: &mut InvertParam,
) -> SolveOutcome {
    log::debug!("{}: zero source, returning zero solution", kind);
    out.zero();
    let outcome = SolveOutcome::trivial();
    outcome.record(param);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylat_field::{DiagonalOperator, PrecisionOperator};

    fn diag() -> DiagonalOperator {
        DiagonalOperator::from_real(&[1.0, 2.0, 3.0, 4.0]).unwrap()
    }

    #[test]
    fn factory_builds_every_single_rhs_kind() {
        let op = diag();
        let mut profile = TimeProfile::new("test");
        for kind in SolverKind::ALL {
            let param = InvertParam::for_solver(kind);
            let solver = create(&param, &op, &op, &op, &mut profile);
            if kind == SolverKind::MultiShiftCg {
                assert!(matches!(solver, Err(Error::UnsupportedSolver(_))));
            } else {
                assert_eq!(solver.unwrap().kind(), kind);
            }
        }
        assert_eq!(profile.count(interval::INIT), SolverKind::ALL.len());
    }

    #[test]
    fn factory_rejects_mismatched_operators() {
        let op = diag();
        let other = DiagonalOperator::from_real(&[1.0, 2.0]).unwrap();
        let mut profile = TimeProfile::new("test");
        let param = InvertParam::default();

        let err = create(&param, &op, &other, &op, &mut profile).err();
        assert!(matches!(err, Some(Error::GeometryMismatch { .. })));

        let single = PrecisionOperator::new(&op, Precision::Single);
        let err = create(&param, &op, &single, &op, &mut profile).err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));

        let param = InvertParam {
            precision_sloppy: Precision::Single,
            ..Default::default()
        };
        assert!(create(&param, &op, &single, &op, &mut profile).is_ok());
    }

    #[test]
    fn factory_rejects_invalid_param() {
        let op = diag();
        let mut profile = TimeProfile::new("test");
        let param = InvertParam::default().with_tol(-1.0);
        assert!(matches!(
            create(&param, &op, &op, &op, &mut profile).err(),
            Some(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn solve_rejects_wrong_geometry_before_touching_fields() {
        let op = diag();
        let mut profile = TimeProfile::new("test");
        let param = InvertParam::default();
        let mut solver = create(&param, &op, &op, &op, &mut profile).unwrap();

        let g = krylat_field::LatticeGeometry::flat(3).unwrap();
        let input = FieldVector::from_real(g, Precision::Double, &[1.0, 1.0, 1.0]).unwrap();
        let mut out = input.clone();
        let err = solver.solve(&mut out, &input, &mut profile).unwrap_err();
        assert!(matches!(err, Error::GeometryMismatch { .. }));
        assert_eq!(out, input);
    }

    #[test]
    fn vanishing_is_relative() {
        assert!(vanishes(1e-20, 1.0, Precision::Double));
        assert!(!vanishes(1e-20, 1e-20, Precision::Double));
        assert!(vanishes(f64::NAN, 1.0, Precision::Double));
        assert!(vanishes(1e-5, 1.0, Precision::Half));
    }

    #[test]
    fn outcome_records_diagnostics() {
        let outcome = SolveOutcome {
            status: SolverStatus::MaxIterations,
            iterations: 7,
            residual: 1e-3,
            history: vec![1.0, 1e-3],
            secs: 0.5,
        };
        let mut param = InvertParam::default();
        outcome.record(&mut param);
        assert_eq!(param.iter, 7);
        assert_eq!(param.true_res, 1e-3);
        assert!(!outcome.converged());
    }
}

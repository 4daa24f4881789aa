//! Single-precision conjugate gradient for inner solves.
//!
//! No reliable updates, no sloppy operator: every operation runs in the
//! precision of the one operator it is given. Used as a cheap
//! preconditioner where a loose answer is good enough.

use std::time::Instant;

use krylat_field::{FieldVector, LatticeGeometry, LinearOperator};

use crate::error::{Error, Result};
use crate::param::{InvertParam, SolverKind};
use crate::profile::{TimeProfile, interval};
use crate::solver::{
    Finish, SolveOutcome, Solver, SolverStatus, check_fields, check_geometry, trivial_solve,
    true_residual,
};

/// Plain CG on a single operator.
///
/// Owns the search direction and the operator output. The residual lives
/// in a field supplied by the caller through
/// [`solve_with_scratch`](Self::solve_with_scratch); [`Solver::solve`]
/// allocates one per call.
pub struct SimpleCg<'a> {
    mat: &'a dyn LinearOperator,
    param: InvertParam,
    geometry: LatticeGeometry,
    p: FieldVector,
    ap: FieldVector,
}

impl<'a> SimpleCg<'a> {
    pub fn new(mat: &'a dyn LinearOperator, param: InvertParam) -> Result<Self> {
        param.validate()?;
        let geometry = mat.geometry();
        let p = FieldVector::zeros(geometry, mat.precision());
        Ok(Self {
            mat,
            param,
            geometry,
            ap: p.clone(),
            p,
        })
    }

    /// A residual field suitable for [`solve_with_scratch`](Self::solve_with_scratch).
    pub fn residual_scratch(&self) -> FieldVector {
        FieldVector::zeros(self.geometry, self.mat.precision())
    }

    /// Solve with `r` as residual storage; `r` is overwritten.
    pub fn solve_with_scratch(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
        r: &mut FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<SolveOutcome> {
        check_fields(self.geometry, out, input)?;
        check_geometry(self.geometry, r.geometry())?;
        if r.precision() != self.mat.precision() {
            return Err(Error::InvalidConfig(format!(
                "residual scratch is {} precision but the operator is {}",
                r.precision(),
                self.mat.precision()
            )));
        }
        let kind = self.kind();
        let started = Instant::now();

        let b2 = input.norm2();
        if b2 == 0.0 {
            return Ok(trivial_solve(kind, out, &mut self.param));
        }

        profile.start(interval::COMPUTE);
        let (p, ap) = (&mut self.p, &mut self.ap);
        self.mat.apply(out, r);
        let mut r2 = r.xmy_norm(input);
        p.copy_from(r);

        let stop = self.param.tol * self.param.tol * b2;
        let mut history = vec![(r2 / b2).sqrt()];
        let mut status = SolverStatus::MaxIterations;
        let mut k = 0;
        while k < self.param.maxiter {
            if r2 <= stop {
                status = SolverStatus::Converged;
                break;
            }
            self.mat.apply(p, ap);
            let p_ap = p.re_dot(ap);
            if !(p_ap.is_finite() && p_ap > 0.0) {
                status = SolverStatus::Breakdown;
                break;
            }
            let alpha = r2 / p_ap;
            out.axpy(alpha, p);
            let r2_old = r2;
            r2 = r.axpy_norm(-alpha, ap);
            p.xpay(r, r2 / r2_old);
            k += 1;
            history.push((r2 / b2).sqrt());
        }
        if status == SolverStatus::MaxIterations && r2 <= stop {
            status = SolverStatus::Converged;
        }
        profile.stop(interval::COMPUTE);

        let residual = true_residual(self.mat, out, input, b2, ap);
        Ok(Finish {
            status,
            iterations: k,
            residual,
            history,
            started,
        }
        .report(kind, &mut self.param))
    }
}

impl Solver for SimpleCg<'_> {
    fn kind(&self) -> SolverKind {
        SolverKind::SimpleCg
    }

    fn param(&self) -> &InvertParam {
        &self.param
    }

    fn solve(
        &mut self,
        out: &mut FieldVector,
        input: &FieldVector,
        profile: &mut TimeProfile,
    ) -> Result<SolveOutcome> {
        let mut r = self.residual_scratch();
        self.solve_with_scratch(out, input, &mut r, profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylat_field::{DenseOperator, Precision, PrecisionOperator};

    #[test]
    fn runs_in_operator_precision() {
        let op = DenseOperator::from_row_slice(3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0])
            .unwrap();
        let single = PrecisionOperator::new(&op, Precision::Single);
        let param = InvertParam {
            precision: Precision::Single,
            tol: 1e-5,
            ..InvertParam::for_solver(SolverKind::SimpleCg)
        };
        let mut solver = SimpleCg::new(&single, param).unwrap();
        assert_eq!(solver.p.precision(), Precision::Single);
        assert_eq!(solver.residual_scratch().precision(), Precision::Single);

        let b = FieldVector::from_real(op.geometry(), Precision::Single, &[1.0, 0.0, 1.0]).unwrap();
        let mut x = b.similar();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert!(outcome.converged());
        assert!(outcome.residual < 1e-4);
    }

    #[test]
    fn budget_limits_work() {
        let op = DenseOperator::from_row_slice(3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0])
            .unwrap();
        let param = InvertParam::for_solver(SolverKind::SimpleCg).with_maxiter(1);
        let mut solver = SimpleCg::new(&op, param).unwrap();
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 0.0, 1.0]).unwrap();
        let mut x = b.similar();
        let (outcome, _) = solver.solve_timed(&mut x, &b).unwrap();
        assert_eq!(outcome.status, SolverStatus::MaxIterations);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn caller_residual_is_reused_across_solves() {
        let op = DenseOperator::from_row_slice(2, &[4.0, 1.0, 1.0, 3.0]).unwrap();
        let param = InvertParam::for_solver(SolverKind::SimpleCg).with_tol(1e-12);
        let mut solver = SimpleCg::new(&op, param).unwrap();
        let mut r = solver.residual_scratch();
        let mut profile = TimeProfile::new("test");

        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 2.0]).unwrap();
        let mut x = b.similar();
        let outcome = solver.solve_with_scratch(&mut x, &b, &mut r, &mut profile).unwrap();
        assert!(outcome.converged());
        // x = [1/11, 7/11]
        assert!((x.as_slice()[0].re - 1.0 / 11.0).abs() < 1e-10);
        assert!((x.as_slice()[1].re - 7.0 / 11.0).abs() < 1e-10);
        // the scratch ends up holding the iterated residual
        assert!(r.norm2().sqrt() < 1e-10);

        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[2.0, 4.0]).unwrap();
        let mut y = b.similar();
        let outcome = solver.solve_with_scratch(&mut y, &b, &mut r, &mut profile).unwrap();
        assert!(outcome.converged());
        assert!((y.as_slice()[1].re - 14.0 / 11.0).abs() < 1e-10);
        assert_eq!(profile.count(interval::COMPUTE), 2);
    }

    #[test]
    fn rejects_scratch_in_wrong_precision() {
        let op = DenseOperator::from_row_slice(2, &[4.0, 1.0, 1.0, 3.0]).unwrap();
        let mut solver = SimpleCg::new(&op, InvertParam::for_solver(SolverKind::SimpleCg)).unwrap();
        let b = FieldVector::from_real(op.geometry(), Precision::Double, &[1.0, 2.0]).unwrap();
        let mut x = b.similar();
        let mut r = b.similar_with_precision(Precision::Single);
        let mut profile = TimeProfile::new("test");
        assert!(matches!(
            solver.solve_with_scratch(&mut x, &b, &mut r, &mut profile),
            Err(Error::InvalidConfig(_))
        ));
    }
}
